//! Error types for the Zont API client and the exporters built on it.
//!
//! Every failure in the crate is a [`ZontError`]. Callers that only need to
//! decide between "retry later" and "give up" should match on
//! [`ZontError::kind`] instead of individual variants.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::timeseries::TimeWindow;

/// Errors that can occur when talking to the Zont API or persisting its data.
#[derive(Debug, Error)]
pub enum ZontError {
    /// The session token was rejected; recovered by one transparent re-authentication.
    #[error("Authentication expired: {message}")]
    AuthExpired { message: String },

    /// Credentials were rejected even after re-authenticating.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Rate limited by the server.
    #[error("Rate limited. Retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Network error (connection failed, timeout, etc.).
    #[error("Network error: {message}")]
    Network { message: String },

    /// Server returned a 5xx status.
    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Server rejected the request with a non-retryable 4xx status.
    #[error("Invalid request ({status}): {message}")]
    InvalidRequest { status: u16, message: String },

    /// The API answered `ok: false` with an error code.
    #[error("API error: {code}")]
    Api { code: String },

    /// The requested device or data does not exist.
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Serialization/deserialization error, including malformed response bodies.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// A transient failure persisted through every allowed attempt.
    #[error("Giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ZontError>,
    },

    /// Merged or stored records are not strictly ordered by timestamp.
    #[error("Integrity violation in {metric}: {detail}")]
    IntegrityViolation { metric: String, detail: String },

    /// A bulk export stopped before reaching the end of its range.
    ///
    /// Everything before `completed_through` has been fetched; resuming from
    /// that instant neither skips nor re-fetches data.
    #[error("Export stopped at window {failed_window}; completed through {completed_through}: {source}")]
    PartialExport {
        completed_through: chrono::DateTime<chrono::Utc>,
        failed_window: TimeWindow,
        #[source]
        source: Box<ZontError>,
    },

    /// Another writer holds the lock for a record file.
    #[error("Target {} is locked by another export", path.display())]
    TargetLocked { path: PathBuf },

    /// The operation was cancelled by a stop signal.
    #[error("Operation cancelled")]
    Cancelled,

    /// Caller supplied invalid arguments.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// I/O error while reading or writing record files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a [`ZontError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Token expired; the transport re-authenticates once.
    AuthExpired,
    /// Server asked us to slow down.
    RateLimited,
    /// Network/5xx failure; worth trying again later.
    Transient,
    /// Will fail again if repeated unchanged.
    Permanent,
    /// Stored or merged data violates ordering/uniqueness.
    IntegrityViolation,
    /// Bulk export aborted mid-range; resumable.
    PartialExport,
}

impl ZontError {
    /// Returns true if this error is transient and the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ZontError::Network { .. } => true,
            ZontError::RateLimited { .. } => true,
            ZontError::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns the server-provided retry delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ZontError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classifies the error for callers deciding whether to try again.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ZontError::AuthExpired { .. } => ErrorKind::AuthExpired,
            ZontError::RateLimited { .. } => ErrorKind::RateLimited,
            ZontError::Network { .. } | ZontError::ServerError { .. } => ErrorKind::Transient,
            ZontError::RetriesExhausted { source, .. } => match source.kind() {
                ErrorKind::RateLimited => ErrorKind::RateLimited,
                _ => ErrorKind::Transient,
            },
            ZontError::IntegrityViolation { .. } => ErrorKind::IntegrityViolation,
            ZontError::PartialExport { .. } => ErrorKind::PartialExport,
            ZontError::Io(_) => ErrorKind::Transient,
            ZontError::Authentication { .. }
            | ZontError::InvalidRequest { .. }
            | ZontError::Api { .. }
            | ZontError::NotFound { .. }
            | ZontError::Serialization { .. }
            | ZontError::TargetLocked { .. }
            | ZontError::Cancelled
            | ZontError::Validation { .. }
            | ZontError::Configuration { .. } => ErrorKind::Permanent,
        }
    }

    /// Returns the instant an interrupted export can resume from.
    pub fn resume_from(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        match self {
            ZontError::PartialExport {
                completed_through, ..
            } => Some(*completed_through),
            _ => None,
        }
    }

    pub(crate) fn serialization(message: impl Into<String>) -> Self {
        ZontError::Serialization {
            message: message.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        ZontError::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        ZontError::Configuration {
            message: message.into(),
        }
    }
}

/// Result type for Zont operations.
pub type ZontResult<T> = std::result::Result<T, ZontError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zont_error_display() {
        let err = ZontError::Authentication {
            message: "auth_failed".to_string(),
        };
        assert!(err.to_string().contains("auth_failed"));
    }

    #[test]
    fn test_zont_error_is_retryable() {
        assert!(!ZontError::Authentication {
            message: "test".to_string()
        }
        .is_retryable());
        assert!(ZontError::Network {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(ZontError::RateLimited {
            retry_after: Some(Duration::from_secs(60))
        }
        .is_retryable());
        assert!(ZontError::ServerError {
            status: 502,
            message: "bad gateway".to_string()
        }
        .is_retryable());
        assert!(!ZontError::InvalidRequest {
            status: 400,
            message: "bad".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ZontError::AuthExpired {
                message: String::new()
            }
            .kind(),
            ErrorKind::AuthExpired
        );
        assert_eq!(
            ZontError::serialization("not json").kind(),
            ErrorKind::Permanent
        );
        assert_eq!(
            ZontError::Api {
                code: "no_such_thing".to_string()
            }
            .kind(),
            ErrorKind::Permanent
        );

        let exhausted = ZontError::RetriesExhausted {
            attempts: 4,
            source: Box::new(ZontError::ServerError {
                status: 503,
                message: String::new(),
            }),
        };
        assert_eq!(exhausted.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_retry_after_only_for_rate_limit() {
        let limited = ZontError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(ZontError::Cancelled.retry_after(), None);
    }
}
