use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job_status::JobStatus;

/// Event type tag carried by every lifecycle event.
pub const EVENT_TYPE_STATUS_CHANGED: &str = "job.status.changed";

/// Lifecycle event published on every committed status transition and on
/// significant progress changes.
///
/// `previous_status`/`previous_progress` let consumers reconstruct the
/// per-job chain without relying on cross-job ordering.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobStatusChanged {
    pub event_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: i32,
    pub attempt: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_progress: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobStatusChanged {
    pub fn new(job_id: Uuid, status: JobStatus, progress: i32, attempt: i32) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: EVENT_TYPE_STATUS_CHANGED.to_string(),
            timestamp: Utc::now(),
            job_id,
            status,
            progress,
            attempt,
            previous_status: None,
            previous_progress: None,
            step: None,
            message: None,
            error_code: None,
            error_message: None,
        }
    }

    /// Deduplication cache key: at most one event per (job, status, attempt).
    pub fn dedup_key(&self) -> String {
        format!(
            "event:dedup:{}:{}:{}",
            self.job_id, self.status, self.attempt
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_fields_are_omitted() {
        let event = JobStatusChanged::new(Uuid::nil(), JobStatus::Queued, 0, 1);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "job.status.changed");
        assert_eq!(json["status"], "queued");
        assert!(json.get("previous_status").is_none());
        assert!(json.get("error_code").is_none());
    }

    #[test]
    fn test_dedup_key_distinguishes_attempts() {
        let mut event = JobStatusChanged::new(Uuid::nil(), JobStatus::Running, 0, 1);
        let first = event.dedup_key();
        event.attempt = 2;
        assert_ne!(first, event.dedup_key());
    }
}
