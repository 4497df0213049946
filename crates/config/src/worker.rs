//! Worker pool sizing (`WORKER_CONCURRENCY`, `WORKER_QUEUES`). Distinct
//! from a kernel's own tuning knobs (`ComputePiSettings` and friends) —
//! this settles the worker *process's* concurrency model, not one job
//! kernel's parameters.

use crate::error::{optional, parse_env, ConfigError};

#[derive(Debug, Clone)]
pub struct WorkerPoolSettings {
    pub concurrency: usize,
    pub queues: Vec<String>,
}

impl WorkerPoolSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let concurrency: usize = parse_env("WORKER_CONCURRENCY", 1)?;
        let queues = optional("WORKER_QUEUES", "default")
            .split(',')
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        Ok(Self { concurrency: concurrency.max(1), queues })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn splits_comma_separated_queue_list() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("WORKER_QUEUES", "default, doc-tasks");
        let settings = WorkerPoolSettings::from_env().unwrap();
        assert_eq!(settings.queues, vec!["default", "doc-tasks"]);
        std::env::remove_var("WORKER_QUEUES");
    }

    #[test]
    fn concurrency_is_never_zero() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("WORKER_CONCURRENCY", "0");
        let settings = WorkerPoolSettings::from_env().unwrap();
        assert_eq!(settings.concurrency, 1);
        std::env::remove_var("WORKER_CONCURRENCY");
    }
}
