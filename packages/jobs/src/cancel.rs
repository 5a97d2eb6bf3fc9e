use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use common::{JobStatus, WorkloadError};

use crate::cache::Cache;
use crate::entity::job;
use crate::progress::ProgressService;
use crate::store::{CancelOutcome, JobStore, StatusPatch, StoreError};

/// TTL of the fast-path cancel flag.
pub const CANCEL_FLAG_TTL_SECS: u64 = 3600;

fn cancel_key(job_id: Uuid) -> String {
    format!("cancel:{job_id}")
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CancelFlag {
    cancelled: bool,
    requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CancelRequested {
    pub job: job::Model,
    /// The job was already terminal; nothing changed.
    pub already_terminal: bool,
    pub was_already_requested: bool,
}

/// Cooperative cancellation: intent is recorded here, observed by workers
/// polling [`check`](CancellationService::check) at safe points, and made
/// terminal by [`finalize`](CancellationService::finalize).
///
/// The cache keeps the common check path O(1); the database stays the source
/// of truth.
pub struct CancellationService {
    store: Arc<JobStore>,
    cache: Arc<Cache>,
    progress: Arc<ProgressService>,
}

impl CancellationService {
    pub fn new(store: Arc<JobStore>, cache: Arc<Cache>, progress: Arc<ProgressService>) -> Self {
        Self {
            store,
            cache,
            progress,
        }
    }

    /// Request cancellation. Idempotent; success on terminal jobs too.
    pub async fn request(
        &self,
        job_id: Uuid,
        reason: Option<String>,
    ) -> Result<CancelRequested, StoreError> {
        match self
            .store
            .mark_cancel_requested(job_id, reason.clone())
            .await?
        {
            CancelOutcome::AlreadyTerminal { job } => {
                info!(%job_id, status = %job.status, "Cancel requested on terminal job, nothing to do");
                Ok(CancelRequested {
                    was_already_requested: job.cancel_requested,
                    already_terminal: true,
                    job,
                })
            }
            CancelOutcome::Requested {
                job,
                was_already_requested,
            } => {
                let flag = CancelFlag {
                    cancelled: true,
                    requested_at: Utc::now(),
                    reason,
                };
                // Cache failure is non-fatal; the DB flag is authoritative.
                self.cache
                    .put_json(&cancel_key(job_id), &flag, CANCEL_FLAG_TTL_SECS)
                    .await;

                info!(%job_id, status = %job.status, was_already_requested, "Cancellation requested");
                Ok(CancelRequested {
                    job,
                    already_terminal: false,
                    was_already_requested,
                })
            }
        }
    }

    /// Fast cancellation check for workers.
    ///
    /// Returns `Err(WorkloadError::Cancelled)` once cancellation is visible.
    /// Cache misses fall through to the record; read errors conservatively
    /// report "not cancelled" so a flaky store never kills healthy work.
    pub async fn check(&self, job_id: Uuid) -> Result<(), WorkloadError> {
        if let Some(flag) = self.cache.get_json::<CancelFlag>(&cancel_key(job_id)).await {
            if flag.cancelled {
                debug!(%job_id, "Cancellation detected from cache");
                return Err(WorkloadError::Cancelled { job_id });
            }
        }

        match self.store.get(job_id).await {
            Ok(job) => {
                if job.status == JobStatus::Cancelled || job.cancel_requested {
                    let flag = CancelFlag {
                        cancelled: true,
                        requested_at: Utc::now(),
                        reason: None,
                    };
                    self.cache
                        .put_json(&cancel_key(job_id), &flag, CANCEL_FLAG_TTL_SECS)
                        .await;
                    return Err(WorkloadError::Cancelled { job_id });
                }
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                warn!(%job_id, "Job not found during cancellation check");
                Ok(())
            }
            Err(e) => {
                error!(%job_id, error = %e, "Cancellation check failed, assuming not cancelled");
                Ok(())
            }
        }
    }

    /// Make the cancellation terminal and drop the cached flag.
    pub async fn finalize(
        &self,
        job_id: Uuid,
        final_progress: Option<i32>,
        cancellation_point: Option<&str>,
    ) -> Result<job::Model, StoreError> {
        let patch = StatusPatch {
            final_progress,
            metrics: Some(json!({
                "cancellation_completed": {
                    "completed_at": Utc::now(),
                    "cancellation_point": cancellation_point,
                    "final_progress": final_progress,
                }
            })),
            ..Default::default()
        };

        let job = self
            .progress
            .set_status(job_id, JobStatus::Cancelled, patch)
            .await?;

        self.cache.delete(&cancel_key(job_id)).await;

        info!(%job_id, cancellation_point, "Job cancellation completed");
        Ok(job)
    }
}
