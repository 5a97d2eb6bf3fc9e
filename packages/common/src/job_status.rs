#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a job during its lifecycle.
///
/// When the `sea-orm` feature is enabled, this enum can be used directly in SeaORM entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Record created, not yet confirmed on the broker.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "pending"))]
    Pending,
    /// Message confirmed on the broker, waiting for a worker.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "queued"))]
    Queued,
    /// A worker is executing the job body.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "running"))]
    Running,
    /// A retry has been scheduled after a retryable failure.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "retrying"))]
    Retrying,
    /// Finished successfully.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "completed"))]
    Completed,
    /// Failed terminally (dead-lettered unless cancelled).
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "failed"))]
    Failed,
    /// Cancelled cooperatively or before pickup.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "cancelled"))]
    Cancelled,
    /// Exceeded its time budget without attempts remaining.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "timeout"))]
    Timeout,
}

impl JobStatus {
    /// Returns true if this is a terminal state. Terminal states are sticky:
    /// no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `pending -> queued -> running -> terminal`, with the retry loop
    /// `running -> retrying -> queued`. Cancellation is reachable from every
    /// non-terminal state, and a publish failure moves `pending`/`retrying`
    /// straight to `failed`. `timeout` is additionally reachable from
    /// `pending`/`queued` for jobs that never got picked up.
    pub fn can_transition(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Queued) => true,
            (Pending, Cancelled | Failed | Timeout) => true,
            (Queued, Running) => true,
            (Queued, Cancelled | Timeout) => true,
            (Running, Completed | Failed | Cancelled | Timeout | Retrying) => true,
            (Retrying, Queued) => true,
            (Retrying, Cancelled | Failed) => true,
            _ => false,
        }
    }

    /// All possible status values.
    pub const ALL: &'static [JobStatus] = &[
        Self::Pending,
        Self::Queued,
        Self::Running,
        Self::Retrying,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Timeout,
    ];

    /// All terminal statuses.
    pub const TERMINAL: &'static [JobStatus] =
        &[Self::Completed, Self::Failed, Self::Cancelled, Self::Timeout];

    /// Returns the string representation (snake_case).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    invalid: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid status '{}'. Valid values: {}",
            self.invalid,
            JobStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .iter()
            .find(|v| v.as_str() == s)
            .copied()
            .ok_or_else(|| ParseStatusError {
                invalid: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_roundtrip() {
        for status in JobStatus::ALL {
            let json = serde_json::to_string(status).unwrap();
            let parsed: JobStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn test_from_str() {
        assert_eq!("queued".parse::<JobStatus>().unwrap(), JobStatus::Queued);
        assert!("Queued".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(JobStatus::Pending.can_transition(JobStatus::Queued));
        assert!(JobStatus::Queued.can_transition(JobStatus::Running));
        assert!(JobStatus::Running.can_transition(JobStatus::Completed));
    }

    #[test]
    fn test_retry_loop() {
        assert!(JobStatus::Running.can_transition(JobStatus::Retrying));
        assert!(JobStatus::Retrying.can_transition(JobStatus::Queued));
        assert!(!JobStatus::Retrying.can_transition(JobStatus::Running));
    }

    #[test]
    fn test_cancel_before_pickup() {
        assert!(JobStatus::Pending.can_transition(JobStatus::Cancelled));
        assert!(JobStatus::Queued.can_transition(JobStatus::Cancelled));
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        for terminal in JobStatus::TERMINAL {
            assert!(terminal.is_terminal());
            for next in JobStatus::ALL {
                assert!(
                    !terminal.can_transition(*next),
                    "{terminal} -> {next} must be rejected"
                );
            }
        }
    }

    #[test]
    fn test_no_skipping_queued() {
        assert!(!JobStatus::Pending.can_transition(JobStatus::Running));
        assert!(!JobStatus::Pending.can_transition(JobStatus::Completed));
    }
}
