//! End-to-end publish → dispatch → handle → broadcast coverage, exercised
//! across real crate boundaries (`event-log`, `task-store`,
//! `broadcaster`) rather than mocks — the dispatcher's own
//! `#[cfg(test)]` module covers store-side effects in isolation; this
//! directory is the seam the three crates meet at.

use broadcaster::Broadcaster;
use event_log::InMemoryEventLog;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use task_pipeline::{AsyncPublisher, Dispatcher, DispatcherConfig, EventHandler};
use task_store::InMemoryTaskStore;
use task_types::{Progress, TaskEvent, TaskId, TaskPayload, TaskResult, TaskState, TaskStatus};

async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

#[tokio::test]
async fn status_events_land_in_the_store_and_reach_a_live_subscriber() {
    let log: Arc<dyn event_log::EventLog> = Arc::new(InMemoryEventLog::new());
    let store = Arc::new(InMemoryTaskStore::new());
    let broadcast = Arc::new(Broadcaster::new());
    let task_id = TaskId::new();
    store.create_task("owner", task_id, TaskPayload::ComputePi { digits: 5 }).await.unwrap();

    let (_session, mut rx) = broadcast.subscribe(task_id, 8).await;

    let config = DispatcherConfig { block_ms: 200, ..Default::default() };
    let handler = EventHandler::new(store.clone(), broadcast.clone(), task_pipeline::DEFAULT_DELTA);
    let mut dispatcher = Dispatcher::new(config.clone(), log.clone(), handler);
    dispatcher.start().await.unwrap();

    let publisher = AsyncPublisher::new(log.clone(), config.stream.clone());
    publisher
        .publish(&TaskEvent::status(
            task_id,
            TaskStatus {
                state: TaskState::Running,
                progress: Progress { percentage: Some(0.4), ..Default::default() },
                message: None,
                metrics: HashMap::new(),
            },
        ))
        .await
        .unwrap();

    settle().await;
    dispatcher.stop().await;

    let status = store.get_status("owner", task_id).await.unwrap();
    assert_eq!(status.state, TaskState::Running);
    assert_eq!(status.progress.percentage, Some(0.4));

    let delivered = rx.try_recv().expect("live subscriber should have received the status");
    assert_eq!(delivered.task_id, task_id);
}

#[tokio::test]
async fn result_is_persisted_and_broadcast_but_chunks_are_broadcast_only() {
    let log: Arc<dyn event_log::EventLog> = Arc::new(InMemoryEventLog::new());
    let store = Arc::new(InMemoryTaskStore::new());
    let broadcast = Arc::new(Broadcaster::new());
    let task_id = TaskId::new();
    store.create_task("owner", task_id, TaskPayload::DocumentAnalysis {
        text: "hello world".to_string(),
        keywords: vec!["hello".to_string()],
    }).await.unwrap();

    let (_session, mut rx) = broadcast.subscribe(task_id, 8).await;

    let config = DispatcherConfig { block_ms: 200, ..Default::default() };
    let handler = EventHandler::new(store.clone(), broadcast.clone(), task_pipeline::DEFAULT_DELTA);
    let mut dispatcher = Dispatcher::new(config.clone(), log.clone(), handler);
    dispatcher.start().await.unwrap();

    let publisher = AsyncPublisher::new(log.clone(), config.stream.clone());
    publisher
        .publish(&TaskEvent::result_chunk(
            task_id,
            "0".to_string(),
            serde_json::json!([{"keyword": "hello"}]),
            true,
        ))
        .await
        .unwrap();
    publisher
        .publish(&TaskEvent::result(
            task_id,
            serde_json::to_value(TaskResult {
                task_id,
                data: serde_json::json!({"total_matches": 1}),
                expires_at: None,
                ttl_seconds: None,
            })
            .unwrap(),
        ))
        .await
        .unwrap();

    settle().await;
    dispatcher.stop().await;

    // chunk, then result — both broadcast, only the result is durable.
    let first = rx.try_recv().unwrap();
    assert!(first.payload.get("chunk_id").is_some());
    let second = rx.try_recv().unwrap();
    assert!(second.payload.get("result").is_some());

    let result = store.get_result("owner", task_id).await.unwrap().expect("result should be durable");
    assert_eq!(result.data["total_matches"], 1);
}

#[tokio::test]
async fn poison_pill_does_not_block_later_valid_events() {
    let log: Arc<dyn event_log::EventLog> = Arc::new(InMemoryEventLog::new());
    let store = Arc::new(InMemoryTaskStore::new());
    let broadcast = Arc::new(Broadcaster::new());
    let task_id = TaskId::new();
    store.create_task("owner", task_id, TaskPayload::ComputePi { digits: 5 }).await.unwrap();

    let config = DispatcherConfig { block_ms: 200, ..Default::default() };
    log.ensure_group(&config.stream, &config.group, &config.start_id).await.unwrap();
    let mut bad_fields = HashMap::new();
    bad_fields.insert("event_id".to_string(), "not-an-id".to_string());
    log.append(&config.stream, bad_fields, None).await.unwrap();

    let handler = EventHandler::new(store.clone(), broadcast.clone(), task_pipeline::DEFAULT_DELTA);
    let mut dispatcher = Dispatcher::new(config.clone(), log.clone(), handler);
    dispatcher.start().await.unwrap();

    let publisher = AsyncPublisher::new(log.clone(), config.stream.clone());
    publisher
        .publish(&TaskEvent::status(task_id, TaskStatus::queued()))
        .await
        .unwrap();

    settle().await;
    dispatcher.stop().await;

    let status = store.get_status("owner", task_id).await.unwrap();
    assert_eq!(status.state, TaskState::Queued);
}
