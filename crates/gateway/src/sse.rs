//! Server-Sent Events framing for the subscribe endpoint
//! (`event: message\ndata: ...\n\n`), carrying the broadcaster's
//! `{type, task_id, payload}` envelope as the `data:` line.

use broadcaster::BroadcastMessage;
use bytes::Bytes;

pub fn format_message(message: &BroadcastMessage) -> Bytes {
    let data = serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("event: message\ndata: {data}\n\n"))
}

pub fn format_keepalive() -> Bytes {
    Bytes::from_static(b": keepalive\n\n")
}
