//! Typed error model for the tether runtime.
//!
//! [`TetherError`] carries a machine-readable [`ErrorCode`], a human
//! message, an optional wrapped cause, and free-form context fields.
//! Components classify errors at the source; call sites branch on the
//! code rather than matching message strings.

use std::collections::HashMap;

use thiserror::Error;

/// Machine-readable error codes propagated across component boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorCode {
    // Input / config
    InvalidInput,
    InvalidConfig,
    NotFound,
    AlreadyExists,
    PermissionDenied,

    // Transient
    Timeout,
    RateLimit,
    ProviderUnavailable,
    ProviderTimeout,

    // Security / billing
    AuthenticationFailed,
    BillingError,

    // Semantic
    ContextOverflow,
    ToolExecutionFailed,
    ToolNotFound,
    SkillNotFound,
    SessionNotFound,
    SessionCorrupted,

    // Infrastructure
    BusClosed,
    Io,
    Serialization,
    Cancelled,
    Internal,
}

impl ErrorCode {
    /// Whether a failure with this code may succeed if the operation is
    /// simply attempted again.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout
                | ErrorCode::RateLimit
                | ErrorCode::ProviderUnavailable
                | ErrorCode::ProviderTimeout
        )
    }

    /// Whether a failure with this code must abort the current operation
    /// instead of being retried or degraded.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidConfig
                | ErrorCode::PermissionDenied
                | ErrorCode::BillingError
                | ErrorCode::AuthenticationFailed
                | ErrorCode::SessionCorrupted
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        f.write_str(s.trim_matches('"'))
    }
}

/// Top-level error type for the tether runtime.
#[derive(Error, Debug)]
#[error("{code}: {message}")]
pub struct TetherError {
    /// Typed error code.
    pub code: ErrorCode,

    /// Human-readable single-line description.
    pub message: String,

    /// Wrapped cause, if any.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,

    /// Structured context fields (session key, job id, channel, ...).
    pub context: HashMap<String, String>,
}

impl TetherError {
    /// Create an error with a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: HashMap::new(),
        }
    }

    /// Attach a wrapped cause.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach a context field.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Shorthand for an [`ErrorCode::InvalidInput`] error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Shorthand for an [`ErrorCode::InvalidConfig`] error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfig, message)
    }

    /// Shorthand for an [`ErrorCode::NotFound`] error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Shorthand for an [`ErrorCode::AlreadyExists`] error.
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyExists, message)
    }

    /// Shorthand for an [`ErrorCode::Internal`] error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Shorthand for an [`ErrorCode::Cancelled`] error.
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "operation cancelled")
    }

    /// Whether this error may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Whether this error must abort the current operation.
    pub fn is_fatal(&self) -> bool {
        self.code.is_fatal()
    }
}

impl From<std::io::Error> for TetherError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorCode::Io, err.to_string()).with_source(err)
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::Serialization, err.to_string()).with_source(err)
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TetherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let err = TetherError::new(ErrorCode::RateLimit, "slow down");
        assert_eq!(err.to_string(), "rate_limit: slow down");
    }

    #[test]
    fn retryable_codes() {
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::RateLimit.is_retryable());
        assert!(ErrorCode::ProviderUnavailable.is_retryable());
        assert!(!ErrorCode::BillingError.is_retryable());
        assert!(!ErrorCode::ContextOverflow.is_retryable());
    }

    #[test]
    fn fatal_codes() {
        assert!(ErrorCode::InvalidConfig.is_fatal());
        assert!(ErrorCode::PermissionDenied.is_fatal());
        assert!(ErrorCode::BillingError.is_fatal());
        assert!(ErrorCode::AuthenticationFailed.is_fatal());
        assert!(ErrorCode::SessionCorrupted.is_fatal());
        assert!(!ErrorCode::Timeout.is_fatal());
    }

    #[test]
    fn context_fields_attach() {
        let err = TetherError::not_found("no such job")
            .with_context("job_id", "job-42")
            .with_context("channel", "cron");
        assert_eq!(err.context["job_id"], "job-42");
        assert_eq!(err.context["channel"], "cron");
    }

    #[test]
    fn source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: TetherError = io.into();
        assert_eq!(err.code, ErrorCode::Io);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn json_error_maps_to_serialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{nope}}").unwrap_err();
        let err: TetherError = json_err.into();
        assert_eq!(err.code, ErrorCode::Serialization);
    }

    #[test]
    fn code_serde_names_are_snake_case() {
        let json = serde_json::to_string(&ErrorCode::ContextOverflow).unwrap();
        assert_eq!(json, "\"context_overflow\"");
        let back: ErrorCode = serde_json::from_str("\"session_corrupted\"").unwrap();
        assert_eq!(back, ErrorCode::SessionCorrupted);
    }
}
