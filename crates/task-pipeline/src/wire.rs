//! Event Log wire encoding: each `TaskEvent` field is carried as a
//! string-encoded entry field, `payload` JSON-encoded.

use event_log::Fields;
use std::collections::HashMap;
use std::str::FromStr;
use task_types::{CoreError, EventId, TaskEvent, TaskEventPayload, TaskEventType, TaskId};

pub fn encode(event: &TaskEvent) -> Result<Fields, CoreError> {
    let mut fields = HashMap::new();
    fields.insert("event_id".to_string(), event.event_id.to_string());
    fields.insert("type".to_string(), event.event_type.as_str().to_string());
    fields.insert("task_id".to_string(), event.task_id.to_string());
    fields.insert("ts".to_string(), event.ts.to_rfc3339());
    fields.insert("payload".to_string(), serde_json::to_string(&event.payload)?);
    Ok(fields)
}

/// Decodes a raw entry back into a `TaskEvent`. Any missing field or
/// malformed payload is `InvalidEvent` — the consumer loop's poison-pill
/// policy acks and drops these rather than blocking the group.
pub fn decode(fields: &Fields) -> Result<TaskEvent, CoreError> {
    let get = |k: &str| {
        fields.get(k).cloned().ok_or_else(|| CoreError::InvalidEvent(format!("missing field: {k}")))
    };

    let event_id = EventId::from_str(&get("event_id")?)
        .map_err(|e| CoreError::InvalidEvent(e.to_string()))?;
    let type_str = get("type")?;
    let event_type = match type_str.as_str() {
        "TASK_STATUS" => TaskEventType::TaskStatus,
        "TASK_RESULT" => TaskEventType::TaskResult,
        "TASK_RESULT_CHUNK" => TaskEventType::TaskResultChunk,
        other => return Err(CoreError::InvalidEvent(format!("unknown event type: {other}"))),
    };
    let task_id =
        TaskId::from_str(&get("task_id")?).map_err(|e| CoreError::InvalidEvent(e.to_string()))?;
    let ts = chrono::DateTime::parse_from_rfc3339(&get("ts")?)
        .map_err(|e| CoreError::InvalidEvent(e.to_string()))?
        .with_timezone(&chrono::Utc);
    let payload_str = get("payload")?;
    let payload: TaskEventPayload = serde_json::from_str(&payload_str)?;

    Ok(TaskEvent { event_id, event_type, task_id, ts, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_types::TaskStatus;

    #[test]
    fn round_trips() {
        let event = TaskEvent::status(TaskId::new(), TaskStatus::queued());
        let fields = encode(&event).unwrap();
        let decoded = decode(&fields).unwrap();
        assert_eq!(decoded.task_id, event.task_id);
        assert_eq!(decoded.event_type, event.event_type);
    }

    #[test]
    fn missing_field_is_invalid_event() {
        let fields: Fields = HashMap::new();
        let err = decode(&fields).unwrap_err();
        assert!(matches!(err, CoreError::InvalidEvent(_)));
    }
}
