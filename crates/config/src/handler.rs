//! Event Handler tuning (`STATUS_DELTA`, the progress throttle threshold;
//! `RESULT_TTL_SECONDS`, the fallback TTL applied to results that arrive
//! without their own) and API surface limits (`MAX_DIGITS`).

use crate::error::{parse_env, ConfigError};

#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub status_delta: f64,
    pub result_ttl_seconds: i64,
}

impl HandlerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            status_delta: parse_env("STATUS_DELTA", 0.02)?,
            result_ttl_seconds: parse_env("RESULT_TTL_SECONDS", 3600)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub max_digits: u32,
    pub app_name: String,
    pub app_version: String,
}

impl ApiSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            max_digits: parse_env("MAX_DIGITS", 2000)?,
            app_name: crate::error::optional("APP_NAME", "task-execution-service"),
            app_version: crate::error::optional("APP_VERSION", env!("CARGO_PKG_VERSION")),
        })
    }
}
