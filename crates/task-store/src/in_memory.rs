//! In-memory task storage backend.
//!
//! Suitable for development, testing, and single-instance deployments.
//! Tasks are stored in a `HashMap` behind an `RwLock`.

use crate::state_machine;
use crate::traits::TaskStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use task_types::{
    CoreError, ListTasksFilter, Task, TaskId, TaskListPage, TaskMetadata, TaskPayload, TaskResult,
    TaskStatus, TaskView, MAX_LIST_LIMIT,
};

#[derive(Debug, Clone)]
pub struct InMemoryTaskConfig {
    /// Maximum number of tasks to store (0 = unlimited)
    pub max_tasks: usize,
}

impl Default for InMemoryTaskConfig {
    fn default() -> Self {
        Self { max_tasks: 0 }
    }
}

struct Entry {
    owner_id: String,
    payload: TaskPayload,
    status: TaskStatus,
    metadata: TaskMetadata,
    result: Option<TaskResult>,
}

/// In-memory task storage backend. Uses `Arc<RwLock<HashMap>>` for
/// concurrent access — fine for a single process since every operation
/// here completes without ever yielding across the lock.
#[derive(Clone)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<TaskId, Entry>>>,
    config: InMemoryTaskConfig,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self { tasks: Arc::new(RwLock::new(HashMap::new())), config: InMemoryTaskConfig::default() }
    }

    pub fn with_config(config: InMemoryTaskConfig) -> Self {
        Self { tasks: Arc::new(RwLock::new(HashMap::new())), config }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

fn view(task_id: TaskId, entry: &Entry) -> TaskView {
    TaskView {
        task_id,
        owner_id: entry.owner_id.clone(),
        task_type: entry.payload.task_type(),
        state: entry.status.state,
        created_at: entry.metadata.created_at,
        updated_at: entry.metadata.updated_at,
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    fn backend_name(&self) -> &'static str {
        "in-memory"
    }

    async fn create_task(
        &self,
        owner_id: &str,
        task_id: TaskId,
        payload: TaskPayload,
    ) -> Result<(), CoreError> {
        let mut tasks = self.tasks.write().await;
        if self.config.max_tasks > 0 && tasks.len() >= self.config.max_tasks {
            return Err(CoreError::Transient("task store at capacity".to_string()));
        }
        if tasks.contains_key(&task_id) {
            return Err(CoreError::Conflict);
        }
        let now = Utc::now();
        tasks.insert(
            task_id,
            Entry {
                owner_id: owner_id.to_string(),
                payload,
                status: TaskStatus::queued(),
                metadata: TaskMetadata {
                    created_at: Some(now),
                    updated_at: Some(now),
                    started_at: None,
                    finished_at: None,
                    custom: HashMap::new(),
                },
                result: None,
            },
        );
        Ok(())
    }

    async fn get_task(&self, owner_id: &str, task_id: TaskId) -> Result<Task, CoreError> {
        let tasks = self.tasks.read().await;
        let entry = tasks.get(&task_id).ok_or(CoreError::NotFound)?;
        if entry.owner_id != owner_id {
            return Err(CoreError::AccessDenied);
        }
        Ok(Task {
            task_id,
            owner_id: entry.owner_id.clone(),
            payload: entry.payload.clone(),
            status: entry.status.clone(),
            metadata: entry.metadata.clone(),
            result: entry.result.clone(),
        })
    }

    async fn get_status(&self, owner_id: &str, task_id: TaskId) -> Result<TaskStatus, CoreError> {
        Ok(self.get_task(owner_id, task_id).await?.status)
    }

    async fn get_result(
        &self,
        owner_id: &str,
        task_id: TaskId,
    ) -> Result<Option<TaskResult>, CoreError> {
        Ok(self.get_task(owner_id, task_id).await?.result)
    }

    async fn list_tasks(
        &self,
        owner_id: &str,
        filter: ListTasksFilter,
    ) -> Result<TaskListPage, CoreError> {
        let limit = filter.limit.clamp(1, MAX_LIST_LIMIT) as usize;
        let tasks = self.tasks.read().await;
        let mut matches: Vec<(TaskId, &Entry)> = tasks
            .iter()
            .filter(|(_, e)| e.owner_id == owner_id)
            .filter(|(_, e)| filter.task_type.map(|t| t == e.payload.task_type()).unwrap_or(true))
            .filter(|(_, e)| filter.state.map(|s| s == e.status.state).unwrap_or(true))
            .map(|(id, e)| (*id, e))
            .collect();
        matches.sort_by_key(|(id, _)| *id);

        let offset = filter.offset as usize;
        let page: Vec<TaskView> =
            matches.iter().skip(offset).take(limit).map(|(id, e)| view(*id, e)).collect();
        let next_offset =
            if offset + page.len() < matches.len() { Some((offset + page.len()) as u32) } else { None };

        Ok(TaskListPage { tasks: page, next_offset })
    }

    async fn update_task_status(&self, task_id: TaskId, status: TaskStatus) -> Result<(), CoreError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks.get_mut(&task_id).ok_or(CoreError::NotFound)?;
        if !state_machine::should_apply(entry.status.state, status.state) {
            return Ok(());
        }
        let now = Utc::now();
        if status.state.is_terminal() {
            entry.metadata.finished_at = Some(now);
        }
        if entry.metadata.started_at.is_none()
            && matches!(status.state, task_types::TaskState::Running)
        {
            entry.metadata.started_at = Some(now);
        }
        entry.metadata.updated_at = Some(now);
        entry.status = status;
        Ok(())
    }

    async fn set_task_result(
        &self,
        task_id: TaskId,
        result: TaskResult,
        finished_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks.get_mut(&task_id).ok_or(CoreError::NotFound)?;
        entry.result = Some(result);
        if let Some(ts) = finished_at {
            entry.metadata.finished_at = Some(ts);
        }
        entry.metadata.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn recover_stuck_tasks(&self, max_age_ms: u64) -> Result<Vec<TaskId>, CoreError> {
        let mut tasks = self.tasks.write().await;
        let cutoff = Utc::now() - chrono::Duration::milliseconds(max_age_ms as i64);
        let mut recovered = Vec::new();
        for (id, entry) in tasks.iter_mut() {
            if !entry.status.state.is_terminal() {
                let stale = entry.metadata.updated_at.map(|u| u < cutoff).unwrap_or(true);
                if stale {
                    entry.status = TaskStatus::failed("service restarted — task interrupted");
                    entry.metadata.finished_at = Some(Utc::now());
                    entry.metadata.updated_at = Some(Utc::now());
                    recovered.push(*id);
                }
            }
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_types::TaskState;

    fn pi_payload() -> TaskPayload {
        TaskPayload::ComputePi { digits: 3 }
    }

    #[tokio::test]
    async fn create_then_get_starts_queued() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::new();
        store.create_task("owner-a", id, pi_payload()).await.unwrap();
        let status = store.get_status("owner-a", id).await.unwrap();
        assert_eq!(status.state, TaskState::Queued);
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::new();
        store.create_task("owner-a", id, pi_payload()).await.unwrap();
        let err = store.create_task("owner-a", id, pi_payload()).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict));
    }

    #[tokio::test]
    async fn owner_mismatch_denies_access() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::new();
        store.create_task("owner-a", id, pi_payload()).await.unwrap();
        let err = store.get_status("owner-b", id).await.unwrap_err();
        assert!(matches!(err, CoreError::AccessDenied));
    }

    #[tokio::test]
    async fn terminal_state_is_monotonic() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::new();
        store.create_task("owner-a", id, pi_payload()).await.unwrap();
        store
            .update_task_status(id, TaskStatus { state: TaskState::Running, ..TaskStatus::queued() })
            .await
            .unwrap();
        store
            .update_task_status(
                id,
                TaskStatus { state: TaskState::Completed, ..TaskStatus::queued() },
            )
            .await
            .unwrap();
        // A late, reordered RUNNING arriving after COMPLETED is ignored,
        // not rejected — the write is a silent no-op so the dispatcher
        // can still ack the entry.
        store
            .update_task_status(id, TaskStatus { state: TaskState::Running, ..TaskStatus::queued() })
            .await
            .unwrap();
        let status = store.get_status("owner-a", id).await.unwrap();
        assert_eq!(status.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn recover_stuck_tasks_marks_old_non_terminal_as_failed() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::new();
        store.create_task("owner-a", id, pi_payload()).await.unwrap();
        let recovered = store.recover_stuck_tasks(0).await.unwrap();
        assert_eq!(recovered, vec![id]);
        let status = store.get_status("owner-a", id).await.unwrap();
        assert_eq!(status.state, TaskState::Failed);
    }
}
