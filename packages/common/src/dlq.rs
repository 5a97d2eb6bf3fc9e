use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::taxonomy::{ErrorKind, ErrorMetadata};

/// Schema version of the DLQ record format.
pub const DLQ_VERSION: &str = "1.0";

/// Why a job was dead-lettered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// All retry attempts exhausted on a retryable error.
    MaxRetriesExceeded,
    /// The error class never retries.
    NonRetryableError,
    /// Fatal error, dead-lettered on first sight.
    FatalError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxRetriesExceeded => "max_retries_exceeded",
            Self::NonRetryableError => "non_retryable_error",
            Self::FatalError => "fatal_error",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Self-describing record of a terminally-failed attempt.
///
/// Contains enough to re-submit the job without consulting any other system.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DlqPayload {
    // Original task information.
    pub task_id: String,
    pub task_name: String,
    pub original_queue: String,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    pub headers: serde_json::Value,

    // Failure information.
    pub attempt_count: u32,
    pub failed_at: DateTime<Utc>,
    pub error_metadata: ErrorMetadata,

    // Classification.
    pub failure_reason: FailureReason,
    pub error_classification: ErrorKind,

    // Recovery information.
    pub recoverable: bool,
    pub dlq_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::WorkloadError;

    #[test]
    fn test_payload_serde() {
        let err = WorkloadError::Validation("bad geometry".into());
        let payload = DlqPayload {
            task_id: "t-1".into(),
            task_name: "cam".into(),
            original_queue: "cam".into(),
            args: serde_json::json!([]),
            kwargs: serde_json::json!({"input": {"n": 10}}),
            headers: serde_json::json!({"x-attempt": 1}),
            attempt_count: 1,
            failed_at: Utc::now(),
            error_metadata: ErrorMetadata::from_error(&err),
            failure_reason: FailureReason::NonRetryableError,
            error_classification: err.kind(),
            recoverable: false,
            dlq_version: DLQ_VERSION.to_string(),
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["failure_reason"], "non_retryable_error");
        assert_eq!(json["error_classification"], "non_retryable");
        assert_eq!(json["dlq_version"], "1.0");

        let back: DlqPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.kwargs["input"]["n"], 10);
    }
}
