//! Decodes job-queue entries — the counterpart of `task-service`'s
//! `enqueue`, which writes `task_id`/`task_type`/`payload`/`queue_hint`
//! fields onto the route's destination stream.

use event_log::Fields;
use std::str::FromStr;
use task_types::{CoreError, TaskId, TaskPayload};

pub struct Job {
    pub task_id: TaskId,
    pub payload: TaskPayload,
}

pub fn decode(fields: &Fields) -> Result<Job, CoreError> {
    let get = |k: &str| {
        fields.get(k).cloned().ok_or_else(|| CoreError::InvalidEvent(format!("missing field: {k}")))
    };
    let task_id =
        TaskId::from_str(&get("task_id")?).map_err(|e| CoreError::InvalidEvent(e.to_string()))?;
    let payload: TaskPayload = serde_json::from_str(&get("payload")?)?;
    Ok(Job { task_id, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_field_is_invalid_event() {
        let fields: Fields = HashMap::new();
        assert!(decode(&fields).is_err());
    }

    #[test]
    fn round_trips_a_compute_pi_job() {
        let task_id = TaskId::new();
        let payload = TaskPayload::ComputePi { digits: 10 };
        let mut fields = HashMap::new();
        fields.insert("task_id".to_string(), task_id.to_string());
        fields.insert("payload".to_string(), serde_json::to_string(&payload).unwrap());
        let job = decode(&fields).unwrap();
        assert_eq!(job.task_id, task_id);
        assert!(matches!(job.payload, TaskPayload::ComputePi { digits: 10 }));
    }
}
