//! In-process event log backend — a `Vec`-backed stream plus per-group
//! cursor and pending-map, for tests and single-process demos. Reclaim is
//! evaluated against wall-clock idle duration exactly as the Redis backend
//! does, so dispatcher tests can exercise redelivery without a broker.

use crate::traits::{EntryId, EventLog, Fields};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use task_types::CoreError;
use tokio::sync::RwLock;
use tokio::time::sleep;

struct Pending {
    fields: Fields,
    consumer: String,
    delivered_at: Instant,
}

#[derive(Default)]
struct GroupState {
    cursor: usize,
    pending: HashMap<EntryId, Pending>,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<(EntryId, Fields)>,
    next_id: u64,
    groups: HashMap<String, GroupState>,
}

#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    streams: Arc<RwLock<HashMap<String, StreamState>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn ensure_group(&self, stream: &str, group: &str, start_id: &str) -> Result<(), CoreError> {
        let mut streams = self.streams.write().await;
        let state = streams.entry(stream.to_string()).or_default();
        let start_cursor = if start_id == "$" { state.entries.len() } else { 0 };
        state
            .groups
            .entry(group.to_string())
            .or_insert_with(|| GroupState { cursor: start_cursor, pending: HashMap::new() });
        Ok(())
    }

    async fn append(
        &self,
        stream: &str,
        fields: Fields,
        maxlen: Option<usize>,
    ) -> Result<EntryId, CoreError> {
        let mut streams = self.streams.write().await;
        let state = streams.entry(stream.to_string()).or_default();
        let id = EntryId(format!("{}-0", state.next_id));
        state.next_id += 1;
        state.entries.push((id.clone(), fields));
        if let Some(max) = maxlen {
            if state.entries.len() > max {
                let overflow = state.entries.len() - max;
                state.entries.drain(0..overflow);
                for group in state.groups.values_mut() {
                    group.cursor = group.cursor.saturating_sub(overflow);
                }
            }
        }
        Ok(id)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<(EntryId, Fields)>, CoreError> {
        let deadline = Instant::now() + Duration::from_millis(block_ms);
        loop {
            {
                let mut streams = self.streams.write().await;
                let state = streams
                    .get_mut(stream)
                    .ok_or_else(|| CoreError::Fatal(format!("unknown stream: {stream}")))?;
                let group_state = state
                    .groups
                    .get_mut(group)
                    .ok_or_else(|| CoreError::Fatal(format!("unknown group: {group}")))?;

                let available = state.entries.len().saturating_sub(group_state.cursor);
                if available > 0 {
                    let take = available.min(count);
                    let mut out = Vec::with_capacity(take);
                    for (id, fields) in &state.entries[group_state.cursor..group_state.cursor + take] {
                        group_state.pending.insert(
                            id.clone(),
                            Pending {
                                fields: fields.clone(),
                                consumer: consumer.to_string(),
                                delivered_at: Instant::now(),
                            },
                        );
                        out.push((id.clone(), fields.clone()));
                    }
                    group_state.cursor += take;
                    return Ok(out);
                }
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            sleep(Duration::from_millis(20)).await;
        }
    }

    async fn claim_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<(EntryId, Fields)>, CoreError> {
        let mut streams = self.streams.write().await;
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| CoreError::Fatal(format!("unknown stream: {stream}")))?;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| CoreError::Fatal(format!("unknown group: {group}")))?;

        let min_idle = Duration::from_millis(min_idle_ms);
        let now = Instant::now();
        let mut claimed = Vec::new();
        let stale: Vec<EntryId> = group_state
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.delivered_at) >= min_idle)
            .take(count)
            .map(|(id, _)| id.clone())
            .collect();

        for id in stale {
            if let Some(p) = group_state.pending.get_mut(&id) {
                p.consumer = consumer.to_string();
                p.delivered_at = now;
                claimed.push((id, p.fields.clone()));
            }
        }
        Ok(claimed)
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &EntryId) -> Result<(), CoreError> {
        let mut streams = self.streams.write().await;
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| CoreError::Fatal(format!("unknown stream: {stream}")))?;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| CoreError::Fatal(format!("unknown group: {group}")))?;
        group_state.pending.remove(entry_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(payload: &str) -> Fields {
        HashMap::from([("payload".to_string(), payload.to_string())])
    }

    #[tokio::test]
    async fn append_then_read_delivers_in_order() {
        let log = InMemoryEventLog::new();
        log.ensure_group("s", "g", "0").await.unwrap();
        log.append("s", fields("a"), None).await.unwrap();
        log.append("s", fields("b"), None).await.unwrap();

        let entries = log.read_group("s", "g", "c1", 10, 0).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1.get("payload").unwrap(), "a");
    }

    #[tokio::test]
    async fn unacked_entry_is_reclaimable_after_idle() {
        let log = InMemoryEventLog::new();
        log.ensure_group("s", "g", "0").await.unwrap();
        log.append("s", fields("a"), None).await.unwrap();
        log.read_group("s", "g", "c1", 10, 0).await.unwrap();

        let immediate = log.claim_pending("s", "g", "c2", 1000, 10).await.unwrap();
        assert!(immediate.is_empty());

        let claimed = log.claim_pending("s", "g", "c2", 0, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
    }

    #[tokio::test]
    async fn ack_removes_from_pending() {
        let log = InMemoryEventLog::new();
        log.ensure_group("s", "g", "0").await.unwrap();
        let id = log.append("s", fields("a"), None).await.unwrap();
        log.read_group("s", "g", "c1", 10, 0).await.unwrap();
        log.ack("s", "g", &id).await.unwrap();

        let claimed = log.claim_pending("s", "g", "c2", 0, 10).await.unwrap();
        assert!(claimed.is_empty());
    }
}
