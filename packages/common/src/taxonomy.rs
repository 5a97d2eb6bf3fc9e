use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Classification of a failure for retry decision making.
///
/// Classification is by error kind, never by transport status codes. Anything
/// that cannot be classified defaults to `NonRetryable`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient failure; retry per the class retry policy.
    Retryable,
    /// Permanent failure; dead-letter immediately.
    NonRetryable,
    /// Cooperative cancellation; terminal `cancelled`, never dead-lettered.
    Cancellation,
    /// Host-level or integrity failure; dead-letter immediately.
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retryable => "retryable",
            Self::NonRetryable => "non_retryable",
            Self::Cancellation => "cancellation",
            Self::Fatal => "fatal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error surfaced from a job body or the worker harness.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// External service temporarily unavailable.
    #[error("transient external failure: {0}")]
    TransientExternal(String),

    /// Rate limited by an external service.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Seconds the remote asked us to wait, when it said.
        retry_after: Option<u64>,
    },

    /// Network connectivity problem.
    #[error("network error: {0}")]
    Network(String),

    /// The operation (or the hard time limit) timed out.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Input validation failed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Authentication/authorization failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Resource quota exceeded.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The payload could not be interpreted.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The job was cancelled cooperatively.
    #[error("job {job_id} has been cancelled")]
    Cancelled { job_id: Uuid },

    /// The soft time limit elapsed; the body should clean up and stop.
    #[error("soft time limit exceeded after {elapsed_secs}s")]
    SoftTimeLimit { elapsed_secs: u64 },

    /// Data integrity violation.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Host-level resource exhaustion.
    #[error("resources exhausted: {0}")]
    ResourceExhausted(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WorkloadError {
    /// Classify this error for the retry/DLQ decision.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransientExternal(_)
            | Self::RateLimited { .. }
            | Self::Network(_)
            | Self::Timeout(_) => ErrorKind::Retryable,
            Self::Validation(_)
            | Self::Unauthorized(_)
            | Self::QuotaExceeded(_)
            | Self::MalformedInput(_) => ErrorKind::NonRetryable,
            Self::Cancelled { .. } | Self::SoftTimeLimit { .. } => ErrorKind::Cancellation,
            Self::Integrity(_) | Self::ResourceExhausted(_) => ErrorKind::Fatal,
            // Unknown errors default to non-retryable.
            Self::Internal(_) => ErrorKind::NonRetryable,
        }
    }

    /// Stable name of the concrete error type, for DLQ records.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::TransientExternal(_) => "transient_external",
            Self::RateLimited { .. } => "rate_limited",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Validation(_) => "validation",
            Self::Unauthorized(_) => "unauthorized",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::MalformedInput(_) => "malformed_input",
            Self::Cancelled { .. } => "cancelled",
            Self::SoftTimeLimit { .. } => "soft_time_limit",
            Self::Integrity(_) => "integrity",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::Internal(_) => "internal",
        }
    }

    /// Machine-readable code recorded on a failed job.
    ///
    /// Time-limit failures keep their own code; everything else is tagged
    /// with its taxonomy kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            other => other.kind().as_str(),
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Metadata extracted from a failure for logging and DLQ records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub error_type: String,
    pub error_message: String,
    pub error_classification: ErrorKind,
    pub is_retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Free-form extra context (e.g. a backtrace) when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorMetadata {
    pub fn from_error(err: &WorkloadError) -> Self {
        let kind = err.kind();
        Self {
            error_type: err.error_type().to_string(),
            error_message: err.to_string(),
            error_classification: kind,
            is_retryable: kind.is_retryable(),
            retry_after: err.retry_after(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            WorkloadError::Network("refused".into()).kind(),
            ErrorKind::Retryable
        );
        assert_eq!(
            WorkloadError::Timeout("hard limit".into()).kind(),
            ErrorKind::Retryable
        );
        assert_eq!(
            WorkloadError::Validation("bad field".into()).kind(),
            ErrorKind::NonRetryable
        );
        assert_eq!(
            WorkloadError::Cancelled {
                job_id: Uuid::nil()
            }
            .kind(),
            ErrorKind::Cancellation
        );
        assert_eq!(
            WorkloadError::SoftTimeLimit { elapsed_secs: 540 }.kind(),
            ErrorKind::Cancellation
        );
        assert_eq!(
            WorkloadError::Integrity("fk violated".into()).kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_unknown_defaults_to_non_retryable() {
        assert_eq!(
            WorkloadError::Internal("who knows".into()).kind(),
            ErrorKind::NonRetryable
        );
    }

    #[test]
    fn test_timeout_keeps_its_code() {
        assert_eq!(WorkloadError::Timeout("hard".into()).code(), "timeout");
        assert_eq!(
            WorkloadError::Validation("x".into()).code(),
            "non_retryable"
        );
    }

    #[test]
    fn test_metadata_extraction() {
        let err = WorkloadError::RateLimited {
            message: "429 from upstream".into(),
            retry_after: Some(7),
        };
        let meta = ErrorMetadata::from_error(&err);
        assert_eq!(meta.error_type, "rate_limited");
        assert_eq!(meta.error_classification, ErrorKind::Retryable);
        assert!(meta.is_retryable);
        assert_eq!(meta.retry_after, Some(7));
    }
}
