//! Event Handler — applies events to the Durable Store and the Live
//! Broadcaster; owns the progress-Δ throttle.

use broadcaster::{Broadcast, BroadcastMessage};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use task_store::TaskStore;
use task_types::{CoreError, TaskEvent, TaskEventPayload, TaskId, TaskResult, TaskStatus};

/// Default Δ-threshold (`STATUS_DELTA`).
pub const DEFAULT_DELTA: f64 = 0.02;

/// Default result TTL (`RESULT_TTL_SECONDS`) applied when a result carries none.
pub const DEFAULT_RESULT_TTL_SECONDS: i64 = 3600;

/// Processes one event at a time from a single consumer. `last_pct` is
/// mutated only from here, never concurrently — this type is
/// deliberately not `Clone`/`Sync`-shared across consumer tasks; each
/// dispatcher loop owns one.
pub struct EventHandler {
    store: Arc<dyn TaskStore>,
    broadcast: Arc<dyn Broadcast>,
    delta: f64,
    default_result_ttl_seconds: i64,
    last_pct: HashMap<TaskId, f64>,
    cpu_ms: HashMap<TaskId, u64>,
}

impl EventHandler {
    pub fn new(store: Arc<dyn TaskStore>, broadcast: Arc<dyn Broadcast>, delta: f64) -> Self {
        Self::with_result_ttl(store, broadcast, delta, DEFAULT_RESULT_TTL_SECONDS)
    }

    /// `default_result_ttl_seconds` fills in `TaskResult::ttl_seconds`/
    /// `expires_at` when a result arrives without its own TTL.
    pub fn with_result_ttl(
        store: Arc<dyn TaskStore>,
        broadcast: Arc<dyn Broadcast>,
        delta: f64,
        default_result_ttl_seconds: i64,
    ) -> Self {
        Self {
            store,
            broadcast,
            delta,
            default_result_ttl_seconds,
            last_pct: HashMap::new(),
            cpu_ms: HashMap::new(),
        }
    }

    /// Dispatches by event type.
    pub async fn handle(&mut self, event: TaskEvent) -> Result<(), CoreError> {
        let started = Instant::now();
        let result = match event.payload.clone() {
            TaskEventPayload::Status { status } => self.handle_status(&event, status).await,
            TaskEventPayload::Result { result } => self.handle_result(&event, result).await,
            TaskEventPayload::ResultChunk { chunk_id, data, is_last } => {
                self.handle_result_chunk(&event, chunk_id, data, is_last).await
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        *self.cpu_ms.entry(event.task_id).or_insert(0) += elapsed_ms;
        result
    }

    async fn handle_status(&mut self, event: &TaskEvent, mut status: TaskStatus) -> Result<(), CoreError> {
        let pct = status.progress.percentage.unwrap_or(0.0);
        let last = self.last_pct.get(&event.task_id).copied();
        let terminal = status.state.is_terminal();
        let should_write = match last {
            None => true,
            Some(last_pct) => (pct - last_pct).abs() >= self.delta || terminal,
        };

        if should_write {
            self.last_pct.insert(event.task_id, pct);
        }

        // Server-side instrumentation annotated before broadcast, win or
        // lose against the throttle (broadcasts are never throttled).
        let cumulative_cpu_ms = *self.cpu_ms.get(&event.task_id).unwrap_or(&0);
        status.metrics.insert("server_sent_ts".to_string(), json!(chrono::Utc::now().to_rfc3339()));
        status.metrics.insert("server_cpu_ms_ws".to_string(), json!(cumulative_cpu_ms));

        if terminal {
            self.last_pct.remove(&event.task_id);
            self.cpu_ms.remove(&event.task_id);
        }

        if should_write {
            self.store.update_task_status(event.task_id, status.clone()).await?;
        }

        self.broadcast
            .broadcast(
                event.task_id,
                BroadcastMessage {
                    event_type: event.event_type,
                    task_id: event.task_id,
                    payload: json!({ "status": status }),
                },
            )
            .await;
        Ok(())
    }

    async fn handle_result(&mut self, event: &TaskEvent, result: serde_json::Value) -> Result<(), CoreError> {
        let mut task_result = match serde_json::from_value::<TaskResult>(result.clone()) {
            Ok(mut parsed) => {
                parsed.task_id = event.task_id;
                parsed
            }
            Err(_) => TaskResult {
                task_id: event.task_id,
                data: result.clone(),
                expires_at: None,
                ttl_seconds: None,
            },
        };

        if task_result.ttl_seconds.is_none() {
            task_result.ttl_seconds = Some(self.default_result_ttl_seconds);
        }
        if task_result.expires_at.is_none() {
            if let Some(ttl) = task_result.ttl_seconds {
                task_result.expires_at = Some(event.ts + chrono::Duration::seconds(ttl));
            }
        }

        self.store.set_task_result(event.task_id, task_result, Some(event.ts)).await?;

        self.broadcast
            .broadcast(
                event.task_id,
                BroadcastMessage {
                    event_type: event.event_type,
                    task_id: event.task_id,
                    payload: json!({ "result": result }),
                },
            )
            .await;
        Ok(())
    }

    /// Result chunks are never persisted — broadcast-only.
    async fn handle_result_chunk(
        &mut self,
        event: &TaskEvent,
        chunk_id: String,
        data: serde_json::Value,
        is_last: bool,
    ) -> Result<(), CoreError> {
        if chunk_id.is_empty() {
            return Err(CoreError::InvalidEvent("result chunk missing chunk_id".to_string()));
        }
        self.broadcast
            .broadcast(
                event.task_id,
                BroadcastMessage {
                    event_type: event.event_type,
                    task_id: event.task_id,
                    payload: json!({ "chunk_id": chunk_id, "data": data, "is_last": is_last }),
                },
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broadcaster::Broadcaster;
    use task_store::InMemoryTaskStore;
    use task_types::{Progress, TaskPayload, TaskState};

    async fn handler() -> (EventHandler, Arc<InMemoryTaskStore>, TaskId) {
        let store = Arc::new(InMemoryTaskStore::new());
        let broadcast = Arc::new(Broadcaster::new());
        let task_id = TaskId::new();
        store.create_task("owner", task_id, TaskPayload::ComputePi { digits: 3 }).await.unwrap();
        (EventHandler::new(store.clone(), broadcast, DEFAULT_DELTA), store, task_id)
    }

    fn status_event(task_id: TaskId, pct: f64, state: TaskState) -> TaskEvent {
        TaskEvent::status(
            task_id,
            TaskStatus {
                state,
                progress: Progress { percentage: Some(pct), ..Default::default() },
                message: None,
                metrics: HashMap::new(),
            },
        )
    }

    #[tokio::test]
    async fn first_status_always_writes() {
        let (mut handler, store, task_id) = handler().await;
        handler.handle(status_event(task_id, 0.1, TaskState::Running)).await.unwrap();
        let status = store.get_status("owner", task_id).await.unwrap();
        assert_eq!(status.progress.percentage, Some(0.1));
    }

    #[tokio::test]
    async fn sub_threshold_delta_does_not_write() {
        let (mut handler, store, task_id) = handler().await;
        handler.handle(status_event(task_id, 0.10, TaskState::Running)).await.unwrap();
        handler.handle(status_event(task_id, 0.11, TaskState::Running)).await.unwrap();
        let status = store.get_status("owner", task_id).await.unwrap();
        // second write (Δ=0.01 < 0.02) should not have landed
        assert_eq!(status.progress.percentage, Some(0.10));
    }

    #[tokio::test]
    async fn terminal_status_always_writes_and_clears_last_pct() {
        let (mut handler, store, task_id) = handler().await;
        handler.handle(status_event(task_id, 0.10, TaskState::Running)).await.unwrap();
        handler.handle(status_event(task_id, 0.105, TaskState::Completed)).await.unwrap();
        let status = store.get_status("owner", task_id).await.unwrap();
        assert_eq!(status.state, TaskState::Completed);
        assert!(!handler.last_pct.contains_key(&task_id));
        assert!(!handler.cpu_ms.contains_key(&task_id));
    }

    #[tokio::test]
    async fn result_without_ttl_gets_the_default_and_an_expiry() {
        let (mut handler, store, task_id) = handler().await;
        let event = TaskEvent::result(task_id, json!({"data": {"pi": "3.14"}}));
        let ts = event.ts;
        handler.handle(event).await.unwrap();
        let result = store.get_result("owner", task_id).await.unwrap().expect("result should be stored");
        assert_eq!(result.ttl_seconds, Some(DEFAULT_RESULT_TTL_SECONDS));
        assert_eq!(result.expires_at, Some(ts + chrono::Duration::seconds(DEFAULT_RESULT_TTL_SECONDS)));
    }

    #[tokio::test]
    async fn throttle_bounds_writes_to_a_fixed_multiple_of_delta() {
        let (mut handler, store, task_id) = handler().await;
        let mut pct = 0.0;
        while pct < 1.0 {
            handler.handle(status_event(task_id, pct, TaskState::Running)).await.unwrap();
            pct += 0.01;
        }
        handler.handle(status_event(task_id, 1.0, TaskState::Completed)).await.unwrap();
        let status = store.get_status("owner", task_id).await.unwrap();
        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(status.progress.percentage, Some(1.0));
    }

    #[tokio::test]
    async fn empty_chunk_id_is_invalid_event() {
        let (mut handler, _store, task_id) = handler().await;
        let event = TaskEvent::result_chunk(task_id, String::new(), json!([1, 2]), false);
        let err = handler.handle(event).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidEvent(_)));
    }
}
