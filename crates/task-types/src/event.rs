//! The wire unit carried on the Event Log.

use crate::ids::{EventId, TaskId};
use crate::task::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskEventType {
    TaskStatus,
    TaskResult,
    TaskResultChunk,
}

impl TaskEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskEventType::TaskStatus => "TASK_STATUS",
            TaskEventType::TaskResult => "TASK_RESULT",
            TaskEventType::TaskResultChunk => "TASK_RESULT_CHUNK",
        }
    }
}

/// Type-specific body, keyed by `TaskEventType` at the call site rather than
/// by an internal serde tag — the wire format keeps `type` and `payload`
/// as sibling fields on the entry, not a tagged union.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskEventPayload {
    Status { status: TaskStatus },
    Result { result: Value },
    ResultChunk { chunk_id: String, data: Value, is_last: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event_id: EventId,
    #[serde(rename = "type")]
    pub event_type: TaskEventType,
    pub task_id: TaskId,
    pub ts: DateTime<Utc>,
    pub payload: TaskEventPayload,
}

impl TaskEvent {
    pub fn status(task_id: TaskId, status: TaskStatus) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: TaskEventType::TaskStatus,
            task_id,
            ts: Utc::now(),
            payload: TaskEventPayload::Status { status },
        }
    }

    pub fn result(task_id: TaskId, result: Value) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: TaskEventType::TaskResult,
            task_id,
            ts: Utc::now(),
            payload: TaskEventPayload::Result { result },
        }
    }

    pub fn result_chunk(task_id: TaskId, chunk_id: String, data: Value, is_last: bool) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: TaskEventType::TaskResultChunk,
            task_id,
            ts: Utc::now(),
            payload: TaskEventPayload::ResultChunk { chunk_id, data, is_last },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;

    #[test]
    fn round_trips_through_json() {
        let event = TaskEvent::status(TaskId::new(), TaskStatus::queued());
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: TaskEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.task_id, event.task_id);
        assert_eq!(decoded.event_id, event.event_id);
        assert_eq!(decoded.event_type, event.event_type);
        match decoded.payload {
            TaskEventPayload::Status { status } => assert_eq!(status.state, TaskState::Queued),
            _ => panic!("expected status payload"),
        }
    }
}
