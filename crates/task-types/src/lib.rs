//! Shared domain model and error taxonomy for the task-execution pipeline.
//!
//! Every other crate in this workspace depends on this one for the entity
//! types (`Task`, `TaskStatus`, `TaskEvent`, ...) and the error taxonomy
//! (`CoreError`) so that the consumer loop, the service, and the HTTP
//! surface all agree on a single vocabulary.

pub mod error;
pub mod event;
pub mod ids;
pub mod routing;
pub mod task;

pub use error::CoreError;
pub use event::{TaskEvent, TaskEventPayload, TaskEventType};
pub use ids::{EventId, TaskId};
pub use routing::{route_for, route_for_str, Route};
pub use task::{
    ListTasksFilter, Progress, Task, TaskListPage, TaskMetadata, TaskPayload, TaskResult,
    TaskState, TaskStatus, TaskType, TaskView, MAX_LIST_LIMIT,
};
