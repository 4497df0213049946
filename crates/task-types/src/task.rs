//! Task aggregate and its constituent parts.

use crate::ids::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Closed but growable task-type enum. Doubles as the JSON discriminator
/// for `TaskPayload` and as the routing-table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    ComputePi,
    DocumentAnalysis,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::ComputePi => "COMPUTE_PI",
            TaskType::DocumentAnalysis => "DOCUMENT_ANALYSIS",
        }
    }
}

/// Type-discriminated payload — a closed tagged variant persisted and
/// transmitted as JSON with `task_type` as the external discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "task_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPayload {
    ComputePi { digits: u32 },
    DocumentAnalysis { text: String, keywords: Vec<String> },
}

impl TaskPayload {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskPayload::ComputePi { .. } => TaskType::ComputePi,
            TaskPayload::DocumentAnalysis { .. } => TaskType::DocumentAnalysis,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Terminal states never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default)]
    pub progress: Progress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub metrics: HashMap<String, Value>,
}

impl TaskStatus {
    pub fn queued() -> Self {
        Self {
            state: TaskState::Queued,
            progress: Progress::default(),
            message: None,
            metrics: HashMap::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: TaskState::Failed,
            progress: Progress::default(),
            message: Some(message.into()),
            metrics: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub custom: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<i64>,
}

/// Full aggregate returned by `get_task` — payload, status, metadata and
/// result joined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub owner_id: String,
    pub payload: TaskPayload,
    pub status: TaskStatus,
    pub metadata: TaskMetadata,
    pub result: Option<TaskResult>,
}

impl Task {
    pub fn task_type(&self) -> TaskType {
        self.payload.task_type()
    }
}

/// Lighter-weight projection used by `list_tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: TaskId,
    pub owner_id: String,
    pub task_type: TaskType,
    pub state: TaskState,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ListTasksFilter {
    pub task_type: Option<TaskType>,
    pub state: Option<TaskState>,
    pub limit: u32,
    pub offset: u32,
}

pub const MAX_LIST_LIMIT: u32 = 500;

#[derive(Debug, Clone)]
pub struct TaskListPage {
    pub tasks: Vec<TaskView>,
    pub next_offset: Option<u32>,
}
