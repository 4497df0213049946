//! # Task Service
//!
//! Creates and enqueues tasks, surfaces status/result to callers.
//! Enqueueing is a plain append to the Event Log on the destination
//! channel the routing table names for the task's type — workers consume
//! that channel as their own group, symmetric to how the Consumer/
//! Dispatcher reads the status/result channel back.

use event_log::{EventLog, Fields};
use std::collections::HashMap;
use std::sync::Arc;
use task_store::TaskStore;
use task_types::{routing, CoreError, ListTasksFilter, Task, TaskId, TaskListPage, TaskPayload, TaskResult, TaskStatus};
use tracing::warn;

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    log: Arc<dyn EventLog>,
}

impl TaskService {
    pub fn new(store: Arc<dyn TaskStore>, log: Arc<dyn EventLog>) -> Self {
        Self { store, log }
    }

    /// Persists the task then enqueues an execution request on the
    /// destination channel named by the routing table. On enqueue failure
    /// the task is marked FAILED and the error is re-surfaced.
    pub async fn create_task(
        &self,
        owner_id: &str,
        task_id: TaskId,
        payload: TaskPayload,
    ) -> Result<TaskId, CoreError> {
        let route = routing::route_for(payload.task_type());
        self.store.create_task(owner_id, task_id, payload.clone()).await?;

        if let Err(enqueue_err) = self.enqueue(&route, task_id, &payload).await {
            let failed = TaskStatus::failed(enqueue_err.to_string());
            if let Err(e) = self.store.update_task_status(task_id, failed).await {
                warn!(task_id = %task_id, error = %e, "failed to record enqueue failure");
            }
            return Err(enqueue_err);
        }
        Ok(task_id)
    }

    async fn enqueue(
        &self,
        route: &routing::Route,
        task_id: TaskId,
        payload: &TaskPayload,
    ) -> Result<(), CoreError> {
        let mut fields: Fields = HashMap::new();
        fields.insert("task_id".to_string(), task_id.to_string());
        fields.insert("task_type".to_string(), payload.task_type().as_str().to_string());
        fields.insert("payload".to_string(), serde_json::to_string(payload)?);
        fields.insert("queue_hint".to_string(), route.queue_hint.to_string());
        self.log.append(route.destination, fields, None).await?;
        Ok(())
    }

    pub async fn get_task(&self, owner_id: &str, task_id: TaskId) -> Result<Task, CoreError> {
        self.store.get_task(owner_id, task_id).await
    }

    pub async fn get_status(&self, owner_id: &str, task_id: TaskId) -> Result<TaskStatus, CoreError> {
        self.store.get_status(owner_id, task_id).await
    }

    pub async fn get_result(
        &self,
        owner_id: &str,
        task_id: TaskId,
    ) -> Result<Option<TaskResult>, CoreError> {
        self.store.get_result(owner_id, task_id).await
    }

    pub async fn list_tasks(
        &self,
        owner_id: &str,
        filter: ListTasksFilter,
    ) -> Result<TaskListPage, CoreError> {
        self.store.list_tasks(owner_id, filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_log::InMemoryEventLog;
    use task_store::InMemoryTaskStore;

    fn service() -> TaskService {
        TaskService::new(Arc::new(InMemoryTaskStore::new()), Arc::new(InMemoryEventLog::new()))
    }

    #[tokio::test]
    async fn create_task_starts_queued() {
        let service = service();
        let task_id = TaskId::new();
        service
            .create_task("owner-a", task_id, TaskPayload::ComputePi { digits: 5 })
            .await
            .unwrap();
        let status = service.get_status("owner-a", task_id).await.unwrap();
        assert_eq!(status.state, task_types::TaskState::Queued);
    }

    #[tokio::test]
    async fn other_owner_cannot_read_status() {
        let service = service();
        let task_id = TaskId::new();
        service
            .create_task("owner-a", task_id, TaskPayload::ComputePi { digits: 5 })
            .await
            .unwrap();
        let err = service.get_status("owner-b", task_id).await.unwrap_err();
        assert!(matches!(err, CoreError::AccessDenied));
    }

    #[tokio::test]
    async fn create_task_routes_compute_pi_to_its_destination_channel() {
        let log = Arc::new(InMemoryEventLog::new());
        let service = TaskService::new(Arc::new(InMemoryTaskStore::new()), log.clone());
        let task_id = TaskId::new();
        service
            .create_task("owner-a", task_id, TaskPayload::ComputePi { digits: 5 })
            .await
            .unwrap();

        log.ensure_group("compute_pi", "workers", "0").await.unwrap();
        let entries = log.read_group("compute_pi", "workers", "w1", 10, 0).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.get("task_id").unwrap(), &task_id.to_string());
    }
}
