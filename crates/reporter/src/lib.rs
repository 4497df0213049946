//! # Reporter
//!
//! Worker-side facade, parameterized by a `task_id`: builds `TaskEvent`s and
//! hands them to the Publisher. Publishing failures propagate — the
//! reporter does not buffer across failures, so a worker's outer wrapper
//! can translate any `Err` here into a final `TASK_STATUS{state: FAILED}`.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use task_pipeline::AsyncPublisher;
use task_types::{CoreError, TaskEvent, TaskId, TaskStatus};
use tracing::warn;

#[derive(Clone)]
pub struct Reporter {
    publisher: AsyncPublisher,
    task_id: TaskId,
    chunk_seq: std::sync::Arc<AtomicU64>,
}

impl Reporter {
    pub fn new(publisher: AsyncPublisher, task_id: TaskId) -> Self {
        Self { publisher, task_id, chunk_seq: std::sync::Arc::new(AtomicU64::new(0)) }
    }

    pub async fn report_status(&self, status: TaskStatus) -> Result<(), CoreError> {
        self.publisher.publish(&TaskEvent::status(self.task_id, status)).await
    }

    pub async fn report_result(&self, data: Value) -> Result<(), CoreError> {
        self.publisher.publish(&TaskEvent::result(self.task_id, data)).await
    }

    /// `batch_size == 0` is a caller programming error; this taxonomy has
    /// no dedicated `InvalidArgument` variant so it is folded into `Fatal`,
    /// which the consumer/worker layers already treat as non-retryable.
    pub fn result_chunk(&self, batch_size: usize) -> Result<ChunkEmitter, CoreError> {
        if batch_size == 0 {
            return Err(CoreError::Fatal("result_chunk batch_size must be > 0".to_string()));
        }
        Ok(ChunkEmitter {
            publisher: self.publisher.clone(),
            task_id: self.task_id,
            chunk_seq: self.chunk_seq.clone(),
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            finished: false,
        })
    }
}

/// Scoped chunk emitter. Accumulates items via `emit`, flushing
/// automatically once the batch reaches `batch_size`; callers MUST call
/// `finish()` to flush the remainder with `is_last = true` — `Drop` cannot
/// run the final async flush, so it only logs if a caller forgot.
pub struct ChunkEmitter {
    publisher: AsyncPublisher,
    task_id: TaskId,
    chunk_seq: std::sync::Arc<AtomicU64>,
    batch_size: usize,
    buffer: Vec<Value>,
    finished: bool,
}

impl ChunkEmitter {
    pub async fn emit(&mut self, item: Value) -> Result<(), CoreError> {
        self.buffer.push(item);
        if self.buffer.len() >= self.batch_size {
            self.flush(false).await?;
        }
        Ok(())
    }

    /// Flushes any remainder with `is_last = true`. Consumes `self` so the
    /// scope cannot be used (and cannot double-flush) afterward.
    pub async fn finish(mut self) -> Result<(), CoreError> {
        self.flush(true).await?;
        self.finished = true;
        Ok(())
    }

    async fn flush(&mut self, is_last: bool) -> Result<(), CoreError> {
        if self.buffer.is_empty() && !is_last {
            return Ok(());
        }
        let chunk_id = self.chunk_seq.fetch_add(1, Ordering::Relaxed).to_string();
        let data = Value::Array(std::mem::take(&mut self.buffer));
        let event = TaskEvent::result_chunk(self.task_id, chunk_id, data, is_last);
        self.publisher.publish(&event).await
    }
}

impl Drop for ChunkEmitter {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                task_id = %self.task_id,
                pending = self.buffer.len(),
                "chunk emitter dropped without finish() — final flush was not sent"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_log::{EventLog, InMemoryEventLog};
    use serde_json::json;
    use std::sync::Arc;

    async fn reporter() -> (Reporter, Arc<InMemoryEventLog>) {
        let log = Arc::new(InMemoryEventLog::new());
        log.ensure_group("task_events", "g", "0").await.unwrap();
        let publisher = AsyncPublisher::new(log.clone(), "task_events");
        (Reporter::new(publisher, TaskId::new()), log)
    }

    #[tokio::test]
    async fn zero_batch_size_is_rejected() {
        let (reporter, _log) = reporter().await;
        assert!(reporter.result_chunk(0).is_err());
    }

    #[tokio::test]
    async fn emits_one_chunk_per_batch_size_items() {
        let (reporter, log) = reporter().await;
        let mut emitter = reporter.result_chunk(2).unwrap();
        emitter.emit(json!(1)).await.unwrap();
        emitter.emit(json!(2)).await.unwrap(); // flushes here
        emitter.emit(json!(3)).await.unwrap();
        emitter.finish().await.unwrap(); // flushes remainder, is_last=true

        let entries = log.read_group("task_events", "g", "c1", 10, 0).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn finish_with_empty_buffer_still_sends_final_is_last() {
        let (reporter, log) = reporter().await;
        let emitter = reporter.result_chunk(5).unwrap();
        emitter.finish().await.unwrap();

        let entries = log.read_group("task_events", "g", "c1", 10, 0).await.unwrap();
        assert_eq!(entries.len(), 1);
    }
}
