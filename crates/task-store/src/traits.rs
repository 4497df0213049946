//! Core task storage trait.
//!
//! Implementations must be `Send + Sync` for use across async contexts.
//! All mutating operations are upserts keyed by `task_id` so the event
//! handler can retry freely under at-least-once delivery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use task_types::{
    CoreError, ListTasksFilter, Task, TaskId, TaskListPage, TaskPayload, TaskResult, TaskStatus,
};

#[async_trait]
pub trait TaskStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Persists Task, TaskPayload, initial TaskStatus (QUEUED, empty
    /// progress) and TaskMetadata atomically. `Conflict` on duplicate id.
    async fn create_task(
        &self,
        owner_id: &str,
        task_id: TaskId,
        payload: TaskPayload,
    ) -> Result<(), CoreError>;

    /// Aggregate read with payload, status, metadata, result joined.
    async fn get_task(&self, owner_id: &str, task_id: TaskId) -> Result<Task, CoreError>;

    async fn get_status(&self, owner_id: &str, task_id: TaskId) -> Result<TaskStatus, CoreError>;

    async fn get_result(
        &self,
        owner_id: &str,
        task_id: TaskId,
    ) -> Result<Option<TaskResult>, CoreError>;

    /// Ordered by task_id ascending; `filter.limit` is clamped to
    /// `task_types::MAX_LIST_LIMIT` by the caller.
    async fn list_tasks(
        &self,
        owner_id: &str,
        filter: ListTasksFilter,
    ) -> Result<TaskListPage, CoreError>;

    /// Privileged — called only by the handler, skips the owner check.
    /// Merges the status row (upsert); `NotFound` if the task is missing.
    /// State-machine validation happens here, not in the caller.
    async fn update_task_status(&self, task_id: TaskId, status: TaskStatus) -> Result<(), CoreError>;

    /// Privileged upsert of the result row; merges `finished_at` into
    /// metadata when provided.
    async fn set_task_result(
        &self,
        task_id: TaskId,
        result: TaskResult,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError>;

    /// Mark all non-terminal tasks older than `max_age_ms` as FAILED.
    /// Called on service startup to recover from unclean shutdown.
    async fn recover_stuck_tasks(&self, max_age_ms: u64) -> Result<Vec<TaskId>, CoreError>;
}
