use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use common::JobStatus;
use common::event::JobStatusChanged;

use crate::cache::{Cache, SetNx};
use crate::entity::job;
use crate::events::EventPublisher;
use crate::store::{JobStore, ProgressOutcome, StatusPatch, StoreError, TransitionOutcome};

/// Per-job throttle window for non-forced progress reports.
pub const PROGRESS_THROTTLE_TTL_SECS: u64 = 2;
/// Stash TTL; slightly longer than the throttle window.
pub const PROGRESS_COALESCE_TTL_SECS: u64 = 3;

fn throttle_key(job_id: Uuid) -> String {
    format!("progress:throttle:{job_id}")
}

fn coalesce_key(job_id: Uuid) -> String {
    format!("progress:coalesce:{job_id}")
}

/// An update stashed during a throttle window. Later stashes overwrite
/// earlier ones; the merge takes the max percent and the latest non-empty
/// scalar fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct CoalescedUpdate {
    percent: i32,
    step: Option<String>,
    message: Option<String>,
    metrics: Option<serde_json::Value>,
    timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub enum ReportOutcome {
    /// Inside the throttle window; stashed for coalescing, nothing written.
    Throttled,
    Applied {
        job: job::Model,
        event_published: bool,
    },
}

/// Progress view assembled from the record and its metrics breadcrumbs.
#[derive(Clone, Debug, Serialize)]
pub struct ProgressInfo {
    pub job_id: Uuid,
    pub percent: i32,
    pub status: JobStatus,
    pub step: Option<String>,
    pub message: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProgressInfo {
    pub fn from_job(job: &job::Model) -> Self {
        let get_str = |key: &str| {
            job.metrics
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        Self {
            job_id: job.id,
            percent: job.progress,
            status: job.status,
            step: get_str("progress_step"),
            message: get_str("progress_message"),
            last_update: job
                .metrics
                .get("last_progress_update")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// Progress reporting and explicit status updates, with event publication as
/// a post-commit step on the same call path (which is what keeps per-job
/// event order aligned with commit order).
pub struct ProgressService {
    store: Arc<JobStore>,
    cache: Arc<Cache>,
    events: Arc<EventPublisher>,
}

impl ProgressService {
    pub fn new(store: Arc<JobStore>, cache: Arc<Cache>, events: Arc<EventPublisher>) -> Self {
        Self {
            store,
            cache,
            events,
        }
    }

    /// Report worker progress.
    ///
    /// Unless forced, at most one report per job per 2 s window reaches the
    /// store; the rest are coalesced. Monotonicity violations surface as
    /// `StoreError::ProgressDecrease` for the caller to log and carry on.
    pub async fn report(
        &self,
        job_id: Uuid,
        percent: i32,
        step: Option<String>,
        message: Option<String>,
        metrics: Option<serde_json::Value>,
        force: bool,
    ) -> Result<ReportOutcome, StoreError> {
        let mut percent = percent.clamp(0, 100);
        let mut step = step;
        let mut message = message;
        let mut metrics = metrics;

        if !force {
            if self
                .cache
                .set_nx_ex(
                    &throttle_key(job_id),
                    &Utc::now().to_rfc3339(),
                    PROGRESS_THROTTLE_TTL_SECS,
                )
                .await
                == SetNx::Exists
            {
                let stash = CoalescedUpdate {
                    percent,
                    step,
                    message,
                    metrics,
                    timestamp: Utc::now(),
                };
                self.cache
                    .put_json(&coalesce_key(job_id), &stash, PROGRESS_COALESCE_TTL_SECS)
                    .await;
                debug!(%job_id, percent, "Progress update throttled, stashed for coalescing");
                return Ok(ReportOutcome::Throttled);
            }

            // Fold in whatever the throttle window accumulated.
            if let Some(stash) = self
                .cache
                .take_json::<CoalescedUpdate>(&coalesce_key(job_id))
                .await
            {
                if stash.percent > percent {
                    percent = stash.percent;
                    step = stash.step.or(step);
                    message = stash.message.or(message);
                    if let Some(stashed_metrics) = stash.metrics {
                        metrics = Some(merge_metrics(metrics, stashed_metrics));
                    }
                }
            }
        }

        match self
            .store
            .update_progress(job_id, percent, step.clone(), message.clone(), metrics)
            .await?
        {
            ProgressOutcome::NoOp { job } => Ok(ReportOutcome::Applied {
                job,
                event_published: false,
            }),
            ProgressOutcome::Updated {
                job,
                previous_status,
                previous_progress,
            } => {
                let mut event_published = false;
                if should_publish(previous_status, job.status, previous_progress, job.progress) {
                    let mut event =
                        JobStatusChanged::new(job.id, job.status, job.progress, job.attempts);
                    event.previous_status = Some(previous_status);
                    event.previous_progress = Some(previous_progress);
                    event.step = step;
                    event.message = message;
                    event_published = self.events.publish_status_changed(&event).await;
                }
                Ok(ReportOutcome::Applied {
                    job,
                    event_published,
                })
            }
        }
    }

    /// Explicit status transition with event publication.
    ///
    /// A transition out of a terminal state is rejected by the store; here it
    /// degrades to returning the unchanged record, so callers late to the
    /// party see where the job ended up.
    pub async fn set_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        patch: StatusPatch,
    ) -> Result<job::Model, StoreError> {
        match self.store.transition(job_id, status, patch.clone()).await {
            Ok(TransitionOutcome {
                job,
                previous_status,
                previous_progress,
            }) => {
                let mut event =
                    JobStatusChanged::new(job.id, job.status, job.progress, job.attempts);
                event.previous_status = Some(previous_status);
                event.previous_progress = Some(previous_progress);
                event.error_code = patch.error_code;
                event.error_message = patch.error_message;
                // Best-effort: a failed publish never rolls back the commit.
                self.events.publish_status_changed(&event).await;
                Ok(job)
            }
            Err(StoreError::IllegalTransition { from, to }) if from.is_terminal() => {
                warn!(%job_id, %from, %to, "Ignoring status change out of terminal state");
                self.store.get(job_id).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_progress(&self, job_id: Uuid) -> Result<ProgressInfo, StoreError> {
        let job = self.store.get(job_id).await?;
        Ok(ProgressInfo::from_job(&job))
    }
}

/// Whether a progress write warrants an event: any status change, any
/// milestone, or a jump of at least ten points.
fn should_publish(
    previous_status: JobStatus,
    status: JobStatus,
    previous_progress: i32,
    progress: i32,
) -> bool {
    status != previous_status
        || (progress - previous_progress).abs() >= 10
        || matches!(progress, 0 | 25 | 50 | 75 | 100)
}

fn merge_metrics(
    base: Option<serde_json::Value>,
    overlay: serde_json::Value,
) -> serde_json::Value {
    match (base, overlay) {
        (Some(serde_json::Value::Object(mut base)), serde_json::Value::Object(overlay)) => {
            base.extend(overlay);
            serde_json::Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_should_publish_on_status_change() {
        assert!(should_publish(
            JobStatus::Queued,
            JobStatus::Running,
            3,
            4
        ));
    }

    #[test]
    fn test_should_publish_on_milestones_and_big_jumps() {
        assert!(should_publish(JobStatus::Running, JobStatus::Running, 40, 50));
        assert!(should_publish(JobStatus::Running, JobStatus::Running, 31, 47));
        assert!(!should_publish(JobStatus::Running, JobStatus::Running, 31, 33));
    }

    #[test]
    fn test_merge_metrics_overlays_keys() {
        let merged = merge_metrics(
            Some(json!({"a": 1, "b": 1})),
            json!({"b": 2, "c": 3}),
        );
        assert_eq!(merged, json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn test_progress_info_reads_breadcrumbs() {
        let job = job::Model {
            id: Uuid::nil(),
            tenant_id: "acme".into(),
            class: common::WorkloadClass::Cam,
            priority: common::JobPriority::Normal,
            status: JobStatus::Running,
            progress: 42,
            attempts: 1,
            retry_count: 0,
            cancel_requested: false,
            input: json!({}),
            output: None,
            metrics: json!({
                "progress_step": "roughing",
                "progress_message": "pass 3 of 7",
            }),
            error_code: None,
            error_message: None,
            task_id: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        let info = ProgressInfo::from_job(&job);
        assert_eq!(info.percent, 42);
        assert_eq!(info.step.as_deref(), Some("roughing"));
        assert_eq!(info.message.as_deref(), Some("pass 3 of 7"));
    }
}
