//! # Event Log
//!
//! A named, append-only sequence per logical channel supporting consumer
//! groups: multiple readers share a group identity, each entry delivered
//! to exactly one member at a time and held in a pending set until
//! acknowledged.

pub mod in_memory;
pub mod redis;
pub mod traits;

pub use in_memory::InMemoryEventLog;
pub use redis::RedisEventLog;
pub use traits::{EntryId, EventLog, Fields};
