//! Service error types.

use thiserror::Error;

/// Errors from the cron and binding services.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServiceError {
    /// A job id did not resolve.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A cron expression failed to parse.
    #[error("invalid cron expression: {0}")]
    InvalidCronExpression(String),

    /// A schedule is semantically invalid (e.g. non-positive interval).
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A binding already exists for the conversation.
    #[error("binding already exists for conversation: {0}")]
    BindingExists(String),

    /// A binding id did not resolve.
    #[error("binding not found: {0}")]
    BindingNotFound(String),

    /// The bus rejected a synthesized message.
    #[error("bus closed")]
    BusClosed,

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
