//! `DATABASE_URL` has no default — it is a hard requirement of any
//! non-in-memory deployment.

use crate::error::{required, ConfigError};

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub database_url: String,
}

impl DatabaseSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self { database_url: required("DATABASE_URL")? })
    }
}
