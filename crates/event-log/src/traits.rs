//! Event Log contract.
//!
//! A named, append-only sequence per logical channel. Entries carry an
//! opaque auto-assigned monotonic id and a map of field→bytes (modeled
//! here as field→String, since every field stored on the log is already
//! string- or JSON-encoded text).

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use task_types::CoreError;

/// Opaque, backend-assigned entry id (a Redis Stream id such as
/// `1700000000000-0`, or a monotonic counter for the in-memory backend).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub String);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type Fields = HashMap<String, String>;

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Idempotent group creation; ignores "group already exists". `start_id`
    /// is the entry id new groups begin reading after — `"0"` replays the
    /// whole stream, `"$"` starts from entries appended after creation.
    async fn ensure_group(&self, stream: &str, group: &str, start_id: &str) -> Result<(), CoreError>;

    /// O(1) append, optionally approximately trimmed to `maxlen`.
    async fn append(
        &self,
        stream: &str,
        fields: Fields,
        maxlen: Option<usize>,
    ) -> Result<EntryId, CoreError>;

    /// Blocks up to `block_ms` for new entries; returns up to `count`.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<(EntryId, Fields)>, CoreError>;

    /// Transfers ownership of entries idle longer than `min_idle_ms` in
    /// another member's pending set, for redelivery after a crash.
    async fn claim_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<(EntryId, Fields)>, CoreError>;

    /// Removes an entry from the group's pending set.
    async fn ack(&self, stream: &str, group: &str, entry_id: &EntryId) -> Result<(), CoreError>;
}
