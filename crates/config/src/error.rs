use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),

    #[error("environment variable {var} has an invalid value: {source}")]
    Parse { var: String, #[source] source: Box<dyn std::error::Error + Send + Sync> },
}

pub(crate) fn required(var: &str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::Missing(var.to_string()))
}

pub(crate) fn optional(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

pub(crate) fn parse_env<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| ConfigError::Parse { var: var.to_string(), source: Box::new(e) }),
        Err(_) => Ok(default),
    }
}
