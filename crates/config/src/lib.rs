//! # Configuration
//!
//! One settings struct per concern, `from_env()`-constructed: plain
//! structs, `std::env::var`, typed defaults, a crate-local
//! [`ConfigError`].
//!
//! [`load_dotenv`] loads a `.env` file if present (dev-time convenience;
//! harmless no-op in production where the file doesn't exist).

mod database;
mod error;
mod handler;
mod stream;
mod worker;

pub use database::DatabaseSettings;
pub use error::ConfigError;
pub use handler::{ApiSettings, HandlerSettings};
pub use stream::StreamSettings;
pub use worker::WorkerPoolSettings;

/// Loads `.env` into the process environment if present. Missing file is
/// not an error — `from_env()` callers still apply their own defaults.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(dotenvy::Error::Io(_)) => {}
        Err(e) => tracing::warn!(error = %e, "failed to load .env"),
    }
}
