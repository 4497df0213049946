//! Publisher — thin producer over the Event Log.
//!
//! Both variants serialize identically so a service-side consumer cannot
//! distinguish which produced an entry.

use event_log::EventLog;
use std::sync::Arc;
use task_types::{CoreError, TaskEvent};

use crate::wire::encode;

/// Service-side producer — the handler and the task service publish
/// through this.
#[derive(Clone)]
pub struct AsyncPublisher {
    log: Arc<dyn EventLog>,
    stream: String,
}

impl AsyncPublisher {
    pub fn new(log: Arc<dyn EventLog>, stream: impl Into<String>) -> Self {
        Self { log, stream: stream.into() }
    }

    pub async fn publish(&self, event: &TaskEvent) -> Result<(), CoreError> {
        let fields = encode(event)?;
        self.log.append(&self.stream, fields, None).await?;
        Ok(())
    }
}

/// Worker-side producer. Workers in this workspace run as `tokio` tasks
/// rather than OS threads, so the synchronous sibling is realized as a
/// thin wrapper that hands the same `AsyncPublisher::publish` future to
/// `block_in_place` — callers that are themselves blocking code (e.g.
/// inside `spawn_blocking`) get a synchronous call, while the wire
/// encoding and the underlying log client are shared with the
/// service-side publisher.
#[derive(Clone)]
pub struct SyncPublisher {
    inner: AsyncPublisher,
    handle: tokio::runtime::Handle,
}

impl SyncPublisher {
    pub fn new(log: Arc<dyn EventLog>, stream: impl Into<String>, handle: tokio::runtime::Handle) -> Self {
        Self { inner: AsyncPublisher::new(log, stream), handle }
    }

    pub fn publish(&self, event: &TaskEvent) -> Result<(), CoreError> {
        tokio::task::block_in_place(|| self.handle.block_on(self.inner.publish(event)))
    }
}
