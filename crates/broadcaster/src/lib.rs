//! # Live Broadcaster
//!
//! Maintains `subscriptions: task_id -> set<session>` and delivers events
//! to live client sessions. Each task's subscriber set lives behind a
//! single `RwLock<HashMap<...>>` of per-session `mpsc::Sender`s, and a
//! broadcast iterates a snapshot so concurrent unsubscribes are safe.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use task_types::{TaskEventType, TaskId};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// A single subscriber's inbox identity. Opaque and per-process; does not
/// survive a reconnect (the client resubscribes and gets a new one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

/// The framed JSON message delivered to subscribers: `{type, task_id,
/// payload}`.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub event_type: TaskEventType,
    pub task_id: TaskId,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait Broadcast: Send + Sync {
    async fn subscribe(&self, task_id: TaskId, buffer: usize) -> (SessionId, mpsc::Receiver<BroadcastMessage>);
    async fn unsubscribe(&self, task_id: TaskId, session: SessionId);
    async fn broadcast(&self, task_id: TaskId, message: BroadcastMessage) -> usize;
}

#[derive(Default)]
pub struct Broadcaster {
    subscriptions: RwLock<HashMap<TaskId, HashMap<SessionId, mpsc::Sender<BroadcastMessage>>>>,
    next_session: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Broadcast for Broadcaster {
    async fn subscribe(
        &self,
        task_id: TaskId,
        buffer: usize,
    ) -> (SessionId, mpsc::Receiver<BroadcastMessage>) {
        let session = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let mut subs = self.subscriptions.write().await;
        subs.entry(task_id).or_default().insert(session, tx);
        debug!(task_id = %task_id, session = session.0, "subscribed");
        (session, rx)
    }

    async fn unsubscribe(&self, task_id: TaskId, session: SessionId) {
        let mut subs = self.subscriptions.write().await;
        if let Some(sessions) = subs.get_mut(&task_id) {
            sessions.remove(&session);
            if sessions.is_empty() {
                subs.remove(&task_id);
            }
        }
    }

    /// Iterates a snapshot of the subscriber set so concurrent
    /// unsubscribes are safe. Sessions whose queue is full or closed are
    /// dropped rather than allowed to block the dispatcher.
    async fn broadcast(&self, task_id: TaskId, message: BroadcastMessage) -> usize {
        let snapshot: Vec<(SessionId, mpsc::Sender<BroadcastMessage>)> = {
            let subs = self.subscriptions.read().await;
            match subs.get(&task_id) {
                Some(sessions) => sessions.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (session, tx) in snapshot {
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(task_id = %task_id, session = session.0, "subscriber queue full, dropping session");
                    dead.push(session);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(session);
                }
            }
        }
        if !dead.is_empty() {
            let mut subs = self.subscriptions.write().await;
            if let Some(sessions) = subs.get_mut(&task_id) {
                for session in dead {
                    sessions.remove(&session);
                }
                if sessions.is_empty() {
                    subs.remove(&task_id);
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(task_id: TaskId) -> BroadcastMessage {
        BroadcastMessage { event_type: TaskEventType::TaskStatus, task_id, payload: json!({"state": "RUNNING"}) }
    }

    #[tokio::test]
    async fn broadcast_fans_out_to_all_subscribers() {
        let broadcaster = Broadcaster::new();
        let task_id = TaskId::new();
        let (_s1, mut r1) = broadcaster.subscribe(task_id, 8).await;
        let (_s2, mut r2) = broadcaster.subscribe(task_id, 8).await;

        let delivered = broadcaster.broadcast(task_id, msg(task_id)).await;
        assert_eq!(delivered, 2);
        assert!(r1.try_recv().is_ok());
        assert!(r2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let broadcaster = Broadcaster::new();
        let task_id = TaskId::new();
        let (s1, mut r1) = broadcaster.subscribe(task_id, 8).await;
        let (_s2, mut r2) = broadcaster.subscribe(task_id, 8).await;

        broadcaster.unsubscribe(task_id, s1).await;
        let delivered = broadcaster.broadcast(task_id, msg(task_id)).await;
        assert_eq!(delivered, 1);
        assert!(r1.try_recv().is_err());
        assert!(r2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn full_queue_drops_the_session_not_the_dispatcher() {
        let broadcaster = Broadcaster::new();
        let task_id = TaskId::new();
        let (_session, _rx) = broadcaster.subscribe(task_id, 1).await;

        assert_eq!(broadcaster.broadcast(task_id, msg(task_id)).await, 1);
        // Queue is now full (receiver never drained) — the second send must
        // drop the session instead of blocking.
        assert_eq!(broadcaster.broadcast(task_id, msg(task_id)).await, 0);
    }
}
