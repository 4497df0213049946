//! Feature-gated conversions onto the shared [`task_types::CoreError`].

#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub fn map_sqlx_error(err: sqlx::Error) -> task_types::CoreError {
    match err {
        sqlx::Error::RowNotFound => task_types::CoreError::NotFound,
        other => task_types::CoreError::Transient(other.to_string()),
    }
}
