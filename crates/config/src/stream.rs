//! Event Log / consumer wiring.

use crate::error::{optional, parse_env, required, ConfigError};

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub redis_url: String,
    pub stream_name: String,
    pub group_name: String,
    /// `None` means "generate one".
    pub consumer_name: Option<String>,
    pub block_ms: u64,
    pub count: usize,
    pub reclaim_pending: bool,
    pub reclaim_idle_ms: u64,
}

impl StreamSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            redis_url: optional("REDIS_URL", "redis://127.0.0.1:6379/0"),
            stream_name: optional("STREAM_NAME", "task_events"),
            group_name: optional("GROUP_NAME", "api"),
            consumer_name: std::env::var("CONSUMER_NAME").ok(),
            block_ms: parse_env("BLOCK_MS", 5000)?,
            count: parse_env("COUNT", 10)?,
            reclaim_pending: parse_env("RECLAIM_PENDING", false)?,
            reclaim_idle_ms: parse_env("RECLAIM_IDLE_MS", 60_000)?,
        })
    }

    #[cfg(test)]
    fn require_redis_url_present() -> Result<String, ConfigError> {
        required("REDIS_URL")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_documented_values() {
        let _guard = ENV_LOCK.lock().unwrap();
        for var in ["REDIS_URL", "STREAM_NAME", "GROUP_NAME", "CONSUMER_NAME", "BLOCK_MS", "COUNT", "RECLAIM_PENDING", "RECLAIM_IDLE_MS"] {
            std::env::remove_var(var);
        }
        let settings = StreamSettings::from_env().unwrap();
        assert_eq!(settings.stream_name, "task_events");
        assert_eq!(settings.group_name, "api");
        assert_eq!(settings.block_ms, 5000);
        assert_eq!(settings.count, 10);
        assert!(!settings.reclaim_pending);
        assert_eq!(settings.reclaim_idle_ms, 60_000);
        assert!(settings.consumer_name.is_none());
    }

    #[test]
    fn missing_required_var_is_reported() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("REDIS_URL");
        assert!(matches!(
            StreamSettings::require_redis_url_present(),
            Err(ConfigError::Missing(var)) if var == "REDIS_URL"
        ));
    }
}
