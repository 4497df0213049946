//! # Durable Store
//!
//! Pluggable task storage backends behind one [`TaskStore`] trait:
//! an in-memory backend for development and tests, and Postgres/SQLite
//! backends for production.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use task_store::prelude::*;
//! use task_types::{TaskId, TaskPayload};
//!
//! # async fn example() -> Result<(), task_types::CoreError> {
//! let store = InMemoryTaskStore::new();
//! let task_id = TaskId::new();
//! store.create_task("owner-1", task_id, TaskPayload::ComputePi { digits: 3 }).await?;
//! let status = store.get_status("owner-1", task_id).await?;
//! assert_eq!(status.state, task_types::TaskState::Queued);
//! # Ok(())
//! # }
//! ```

pub mod error;
#[cfg(feature = "in-memory")]
pub mod in_memory;
pub mod prelude;
pub mod state_machine;
pub mod traits;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "in-memory")]
pub use in_memory::{InMemoryTaskConfig, InMemoryTaskStore};
pub use state_machine::should_apply;
pub use traits::TaskStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresTaskConfig, PostgresTaskStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteTaskConfig, SqliteTaskStore};
