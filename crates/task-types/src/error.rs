//! Error taxonomy shared across the pipeline.
//!
//! Every component boundary returns `CoreError` (or wraps it) so the
//! consumer loop and the HTTP surface can apply a single error-propagation
//! policy off of one set of variants rather than per-crate error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("task not found")]
    NotFound,

    #[error("owner does not have access to this task")]
    AccessDenied,

    #[error("task already exists")]
    Conflict,

    #[error("malformed event: {0}")]
    InvalidEvent(String),

    #[error("no routing entry for task type: {0}")]
    InvalidTaskType(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl CoreError {
    /// `true` for errors the consumer loop should ack-and-drop (poison pill).
    pub fn is_poison_pill(&self) -> bool {
        matches!(self, CoreError::InvalidEvent(_) | CoreError::InvalidTaskType(_))
    }

    /// `true` for errors worth retrying via redelivery rather than dropping.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::InvalidEvent(e.to_string())
    }
}
