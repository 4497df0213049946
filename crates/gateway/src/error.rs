//! Maps `CoreError` onto HTTP responses: `NotFound`/`AccessDenied` become
//! client errors; everything else becomes a server error behind an opaque
//! id (never leaks internals).

use bytes::Bytes;
use http::{Response, StatusCode};
use http_body_util::Full;
use serde_json::json;
use task_types::CoreError;
use tracing::error;

pub type ResponseBody = Full<Bytes>;

pub fn error_response(err: &CoreError) -> Response<ResponseBody> {
    let (status, body) = match err {
        CoreError::NotFound => (StatusCode::NOT_FOUND, json!({"error": "not_found"})),
        CoreError::AccessDenied => (StatusCode::FORBIDDEN, json!({"error": "access_denied"})),
        CoreError::Conflict => (StatusCode::CONFLICT, json!({"error": "conflict"})),
        CoreError::InvalidTaskType(t) => {
            (StatusCode::BAD_REQUEST, json!({"error": "invalid_task_type", "task_type": t}))
        }
        CoreError::InvalidEvent(_) | CoreError::Transient(_) | CoreError::Fatal(_) => {
            let incident_id = task_types::EventId::new().to_string();
            error!(incident_id = %incident_id, error = %err, "internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "internal_error", "incident_id": incident_id}),
            )
        }
    };
    json_response(status, &body)
}

pub fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<ResponseBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response is always well-formed")
}
