//! Route dispatch for the Service API surface: `submit`, `status`,
//! `result`, `subscribe`, plus a listing endpoint. Each handler is a few
//! lines calling into `task-service`/`broadcaster` — a thin layer over
//! the underlying service calls.

use broadcaster::Broadcast;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use task_types::{ListTasksFilter, TaskId, TaskPayload, TaskState, TaskType};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::error::{error_response, json_response, ResponseBody};
use crate::sse::{format_keepalive, format_message};
use crate::state::AppState;

pub type AnyBody = http_body_util::combinators::BoxBody<Bytes, std::convert::Infallible>;

fn boxed(body: ResponseBody) -> Response<AnyBody> {
    body.map(|resp| resp.boxed())
}

#[derive(Deserialize)]
struct SubmitRequest {
    owner_id: String,
    task_type: TaskType,
    payload: serde_json::Value,
}

fn owner_id(req: &Request<Incoming>) -> Option<String> {
    req.uri()
        .query()
        .and_then(|q| url::form_urlencoded::parse(q.as_bytes()).find(|(k, _)| k == "owner_id"))
        .map(|(_, v)| v.into_owned())
}

fn query_param(req: &Request<Incoming>, key: &str) -> Option<String> {
    req.uri()
        .query()
        .and_then(|q| url::form_urlencoded::parse(q.as_bytes()).find(|(k, _)| k == key))
        .map(|(_, v)| v.into_owned())
}

pub async fn route(state: Arc<AppState>, req: Request<Incoming>) -> Response<AnyBody> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let response = match (method, segments.as_slice()) {
        (Method::POST, ["tasks"]) => submit(state, req).await,
        (Method::GET, ["tasks"]) => list_tasks(state, req).await,
        (Method::GET, ["tasks", id, "status"]) => status(state, req, id).await,
        (Method::GET, ["tasks", id, "result"]) => result(state, req, id).await,
        (Method::GET, ["tasks", id, "subscribe"]) => return subscribe(state, id).await,
        _ => boxed(json_response(StatusCode::NOT_FOUND, &json!({"error": "no such route"}))),
    };
    response
}

async fn submit(state: Arc<AppState>, req: Request<Incoming>) -> Response<AnyBody> {
    let bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return boxed(json_response(StatusCode::BAD_REQUEST, &json!({"error": "bad body"}))),
    };
    let parsed: SubmitRequest = match serde_json::from_slice(&bytes) {
        Ok(p) => p,
        Err(e) => {
            return boxed(json_response(
                StatusCode::BAD_REQUEST,
                &json!({"error": "invalid request", "detail": e.to_string()}),
            ))
        }
    };
    let payload: TaskPayload = match parsed.task_type {
        TaskType::ComputePi => match serde_json::from_value(json_with_tag(parsed.payload, "COMPUTE_PI")) {
            Ok(p) => p,
            Err(e) => return boxed(bad_payload(e)),
        },
        TaskType::DocumentAnalysis => {
            match serde_json::from_value(json_with_tag(parsed.payload, "DOCUMENT_ANALYSIS")) {
                Ok(p) => p,
                Err(e) => return boxed(bad_payload(e)),
            }
        }
    };

    if let TaskPayload::ComputePi { digits } = &payload {
        if *digits > state.max_digits {
            return boxed(json_response(
                StatusCode::BAD_REQUEST,
                &json!({"error": "digits exceeds MAX_DIGITS", "max_digits": state.max_digits}),
            ));
        }
    }

    let task_id = TaskId::new();
    match state.service.create_task(&parsed.owner_id, task_id, payload).await {
        Ok(id) => boxed(json_response(StatusCode::CREATED, &json!({"task_id": id.to_string()}))),
        Err(e) => boxed(error_response(&e)),
    }
}

fn json_with_tag(mut payload: serde_json::Value, tag: &str) -> serde_json::Value {
    if let serde_json::Value::Object(map) = &mut payload {
        map.insert("task_type".to_string(), json!(tag));
    }
    payload
}

fn bad_payload(e: serde_json::Error) -> Response<ResponseBody> {
    json_response(StatusCode::BAD_REQUEST, &json!({"error": "invalid payload", "detail": e.to_string()}))
}

async fn status(state: Arc<AppState>, req: Request<Incoming>, id: &str) -> Response<AnyBody> {
    let Some(owner) = owner_id(&req) else {
        return boxed(json_response(StatusCode::BAD_REQUEST, &json!({"error": "owner_id required"})));
    };
    let Ok(task_id) = TaskId::from_str(id) else {
        return boxed(json_response(StatusCode::BAD_REQUEST, &json!({"error": "invalid task id"})));
    };
    match state.service.get_status(&owner, task_id).await {
        Ok(status) => boxed(json_response(StatusCode::OK, &json!(status))),
        Err(e) => boxed(error_response(&e)),
    }
}

async fn result(state: Arc<AppState>, req: Request<Incoming>, id: &str) -> Response<AnyBody> {
    let Some(owner) = owner_id(&req) else {
        return boxed(json_response(StatusCode::BAD_REQUEST, &json!({"error": "owner_id required"})));
    };
    let Ok(task_id) = TaskId::from_str(id) else {
        return boxed(json_response(StatusCode::BAD_REQUEST, &json!({"error": "invalid task id"})));
    };
    match state.service.get_result(&owner, task_id).await {
        Ok(Some(result)) => boxed(json_response(StatusCode::OK, &json!(result))),
        Ok(None) => boxed(json_response(StatusCode::NOT_FOUND, &json!({"error": "no result yet"}))),
        Err(e) => boxed(error_response(&e)),
    }
}

async fn list_tasks(state: Arc<AppState>, req: Request<Incoming>) -> Response<AnyBody> {
    let Some(owner) = owner_id(&req) else {
        return boxed(json_response(StatusCode::BAD_REQUEST, &json!({"error": "owner_id required"})));
    };
    let limit: u32 = query_param(&req, "limit").and_then(|v| v.parse().ok()).unwrap_or(50);
    let offset: u32 = query_param(&req, "offset").and_then(|v| v.parse().ok()).unwrap_or(0);
    let state_filter: Option<TaskState> = query_param(&req, "state").and_then(|v| match v.as_str() {
        "QUEUED" => Some(TaskState::Queued),
        "RUNNING" => Some(TaskState::Running),
        "COMPLETED" => Some(TaskState::Completed),
        "FAILED" => Some(TaskState::Failed),
        "CANCELLED" => Some(TaskState::Cancelled),
        _ => None,
    });
    let filter = ListTasksFilter { task_type: None, state: state_filter, limit, offset };
    match state.service.list_tasks(&owner, filter).await {
        Ok(page) => boxed(json_response(StatusCode::OK, &json!(page.tasks))),
        Err(e) => boxed(error_response(&e)),
    }
}

/// `subscribe` streams the live broadcast feed as Server-Sent Events — a
/// one-way stream, which is all a progress/result feed ever needs from
/// the client side.
async fn subscribe(state: Arc<AppState>, id: &str) -> Response<AnyBody> {
    let Ok(task_id) = TaskId::from_str(id) else {
        return boxed(json_response(StatusCode::BAD_REQUEST, &json!({"error": "invalid task id"})));
    };
    // `_session` is not explicitly unsubscribed: once the SSE connection
    // drops, `rx` drops with it and the next `broadcast` call sweeps the
    // now-closed sender out of the subscription map.
    let (_session, rx) = state.broadcaster.subscribe(task_id, 64).await;
    let messages = ReceiverStream::new(rx).map(|msg| format_message(&msg));
    let keepalive = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(
        std::time::Duration::from_secs(15),
    ))
    .skip(1)
    .map(|_| format_keepalive());
    let stream = futures::stream::select(messages, keepalive).map(|bytes| Ok(Frame::data(bytes)));
    let body = StreamBody::new(stream).boxed();

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(body)
        .expect("static SSE response is always well-formed")
}

