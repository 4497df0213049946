//! Consumer/Dispatcher — reads the Event Log as a named group member,
//! decodes, dispatches to the Event Handler, and acks.

use event_log::EventLog;
use std::sync::Arc;
use task_types::CoreError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::handler::EventHandler;
use crate::wire::decode;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub count: usize,
    pub block_ms: u64,
    pub reclaim_pending: bool,
    pub reclaim_idle_ms: u64,
    /// Entry id a newly created group starts reading after — see
    /// [`event_log::EventLog::ensure_group`].
    pub start_id: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            stream: "task_events".to_string(),
            group: "api".to_string(),
            consumer: format!("consumer-{}", task_types::EventId::new()),
            count: 10,
            block_ms: 5000,
            reclaim_pending: false,
            reclaim_idle_ms: 60_000,
            start_id: "0".to_string(),
        }
    }
}

/// Owns the background loop's lifecycle. `start`/`stop` are not
/// reentrant — callers create one `Dispatcher` per consumer identity.
pub struct Dispatcher {
    config: DispatcherConfig,
    log: Arc<dyn EventLog>,
    handler: Arc<Mutex<EventHandler>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, log: Arc<dyn EventLog>, handler: EventHandler) -> Self {
        Self {
            config,
            log,
            handler: Arc::new(Mutex::new(handler)),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// `ensure_group`, then spawns the loop task and returns.
    pub async fn start(&mut self) -> Result<(), CoreError> {
        self.log
            .ensure_group(&self.config.stream, &self.config.group, &self.config.start_id)
            .await?;
        let config = self.config.clone();
        let log = self.log.clone();
        let handler = self.handler.clone();
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(run_loop(config, log, handler, cancel)));
        Ok(())
    }

    /// Cancels the loop and waits for the in-flight iteration to return.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn run_loop(
    config: DispatcherConfig,
    log: Arc<dyn EventLog>,
    handler: Arc<Mutex<EventHandler>>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            debug!(consumer = %config.consumer, "dispatcher loop cancelled");
            return;
        }

        if config.reclaim_pending {
            match log
                .claim_pending(
                    &config.stream,
                    &config.group,
                    &config.consumer,
                    config.reclaim_idle_ms,
                    config.count,
                )
                .await
            {
                Ok(entries) => {
                    if !entries.is_empty() {
                        debug!(count = entries.len(), "reclaimed pending entries");
                    }
                    process_entries(&config, &log, &handler, entries).await;
                }
                Err(e) => warn!(error = %e, "claim_pending failed"),
            }
            if cancel.is_cancelled() {
                return;
            }
        }

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = log.read_group(
                &config.stream,
                &config.group,
                &config.consumer,
                config.count,
                config.block_ms,
            ) => result,
        };

        match read {
            Ok(entries) => process_entries(&config, &log, &handler, entries).await,
            Err(e) => {
                warn!(error = %e, "read_group failed, retrying");
            }
        }
    }
}

async fn process_entries(
    config: &DispatcherConfig,
    log: &Arc<dyn EventLog>,
    handler: &Arc<Mutex<EventHandler>>,
    entries: Vec<(event_log::EntryId, event_log::Fields)>,
) {
    for (entry_id, fields) in entries {
        let event = match decode(&fields) {
            Ok(event) => event,
            Err(e) => {
                warn!(entry_id = %entry_id, error = %e, "poison pill, acking and dropping");
                ack(config, log, &entry_id).await;
                continue;
            }
        };

        let mut handler = handler.lock().await;
        match handler.handle(event).await {
            Ok(()) => ack(config, log, &entry_id).await,
            Err(e) if e.is_poison_pill() => {
                warn!(entry_id = %entry_id, error = %e, "poison pill, acking and dropping");
                ack(config, log, &entry_id).await;
            }
            Err(e) => {
                error!(entry_id = %entry_id, error = %e, "handler failed, leaving entry pending for redelivery");
            }
        }
    }
}

async fn ack(config: &DispatcherConfig, log: &Arc<dyn EventLog>, entry_id: &event_log::EntryId) {
    if let Err(e) = log.ack(&config.stream, &config.group, entry_id).await {
        warn!(entry_id = %entry_id, error = %e, "ack failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broadcaster::Broadcaster;
    use event_log::InMemoryEventLog;
    use std::time::Duration;
    use task_store::InMemoryTaskStore;
    use task_types::{TaskEvent, TaskId, TaskPayload, TaskState, TaskStatus};

    #[tokio::test]
    async fn dispatches_published_status_event_into_the_store() {
        let log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
        let store = Arc::new(InMemoryTaskStore::new());
        let broadcast = Arc::new(Broadcaster::new());
        let task_id = TaskId::new();
        store.create_task("owner", task_id, TaskPayload::ComputePi { digits: 3 }).await.unwrap();

        let config = DispatcherConfig { block_ms: 200, ..Default::default() };
        let handler = EventHandler::new(store.clone(), broadcast, crate::handler::DEFAULT_DELTA);
        let mut dispatcher = Dispatcher::new(config.clone(), log.clone(), handler);
        dispatcher.start().await.unwrap();

        let publisher = crate::publisher::AsyncPublisher::new(log.clone(), config.stream.clone());
        let event = TaskEvent::status(
            task_id,
            TaskStatus {
                state: TaskState::Running,
                progress: task_types::Progress { percentage: Some(0.5), ..Default::default() },
                message: None,
                metrics: Default::default(),
            },
        );
        publisher.publish(&event).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        dispatcher.stop().await;

        let status = store.get_status("owner", task_id).await.unwrap();
        assert_eq!(status.state, TaskState::Running);
        assert_eq!(status.progress.percentage, Some(0.5));
    }

    #[tokio::test]
    async fn poison_pill_is_acked_not_redelivered() {
        let log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
        let store = Arc::new(InMemoryTaskStore::new());
        let broadcast = Arc::new(Broadcaster::new());
        let config = DispatcherConfig { block_ms: 200, ..Default::default() };
        log.ensure_group(&config.stream, &config.group, &config.start_id).await.unwrap();

        let mut bad_fields = std::collections::HashMap::new();
        bad_fields.insert("event_id".to_string(), "not-an-id".to_string());
        log.append(&config.stream, bad_fields, None).await.unwrap();

        let handler = EventHandler::new(store, broadcast, crate::handler::DEFAULT_DELTA);
        let mut dispatcher = Dispatcher::new(config.clone(), log.clone(), handler);
        dispatcher.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        dispatcher.stop().await;

        let pending = log
            .claim_pending(&config.stream, &config.group, "other", 0, 10)
            .await
            .unwrap();
        assert!(pending.is_empty(), "poison pill should have been acked, not left pending");
    }
}
