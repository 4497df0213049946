//! # Task Pipeline
//!
//! Ties the worker-side Reporter to the Durable Store and Live Broadcaster:
//! the Publisher appends events to the Event Log, the Consumer/Dispatcher
//! reads them back as a named group member, and the Event Handler applies
//! them.

pub mod dispatcher;
pub mod handler;
pub mod publisher;
pub mod wire;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use handler::{EventHandler, DEFAULT_DELTA};
pub use publisher::{AsyncPublisher, SyncPublisher};
