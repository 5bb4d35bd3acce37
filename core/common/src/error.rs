//! Common error types for VitalSync.

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Coarse classification used by retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Quota exhausted or remote rate limit signalled. Retried up to the cap.
    Throttled,
    /// Network/server failure or timeout. Retried up to the cap.
    Transient,
    /// Authorization, validation or unsupported category. Never retried.
    Permanent,
}

/// Top-level error type for VitalSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The store (or the local quota tracker) refused the request.
    #[error("Throttled: {message}")]
    Throttled {
        message: String,
        /// Minimum wait suggested by the remote, if any.
        retry_after: Option<Duration>,
        /// Authoritative quota window reset reported by the remote, if any.
        reset_at: Option<DateTime<Utc>>,
    },

    /// Network or server failure that may succeed on a later attempt.
    #[error("Transient error: {0}")]
    Transient(String),

    /// The remote call did not complete in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Failure that will not go away by retrying.
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// The host application lacks permission for the operation.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The store rejected the payload.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The store does not know the requested category.
    #[error("Unsupported category: {0}")]
    UnsupportedCategory(String),

    /// The store no longer accepts the supplied change token.
    #[error("Change token expired: {0}")]
    CursorExpired(String),

    /// Local persistence failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Shorthand for a throttling error without remote hints.
    pub fn throttled(message: impl Into<String>) -> Self {
        Error::Throttled {
            message: message.into(),
            retry_after: None,
            reset_at: None,
        }
    }

    /// Classify this error for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Throttled { .. } => ErrorKind::Throttled,
            Error::Transient(_) | Error::Timeout(_) | Error::Io(_) => ErrorKind::Transient,
            _ => ErrorKind::Permanent,
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Throttled | ErrorKind::Transient)
    }

    /// Remote `retry_after` hint, if this is a throttling error carrying one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Remote quota reset time, if this is a throttling error carrying one.
    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Error::Throttled { reset_at, .. } => *reset_at,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
