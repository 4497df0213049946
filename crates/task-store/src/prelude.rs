//! Prelude module for convenient imports.
//!
//! ```rust,no_run
//! use task_store::prelude::*;
//! ```

#[cfg(feature = "in-memory")]
pub use crate::in_memory::{InMemoryTaskConfig, InMemoryTaskStore};
#[cfg(feature = "postgres")]
pub use crate::postgres::{PostgresTaskConfig, PostgresTaskStore};
#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteTaskConfig, SqliteTaskStore};
pub use crate::state_machine::should_apply;
pub use crate::traits::TaskStore;
