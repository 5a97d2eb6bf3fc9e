use chrono::Utc;
use common::{JobPriority, JobStatus, WorkloadClass};
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::entity::{job, job_audit};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("progress cannot decrease: current={current}, requested={requested}")]
    ProgressDecrease { current: i32, requested: i32 },

    #[error("job is in terminal state {0}")]
    Terminal(JobStatus),

    #[error(transparent)]
    Db(#[from] DbErr),
}

/// Optional fields applied together with a status transition.
#[derive(Clone, Debug, Default)]
pub struct StatusPatch {
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub output: Option<serde_json::Value>,
    /// Progress to persist on terminal entry (clamped, never below current).
    pub final_progress: Option<i32>,
    /// Broker task id correlating the in-flight message.
    pub task_id: Option<String>,
    /// Attempt number reported by the worker harness.
    pub attempts: Option<i32>,
    /// Extra keys merged into the job's metrics map.
    pub metrics: Option<serde_json::Value>,
}

#[derive(Clone, Debug)]
pub struct TransitionOutcome {
    pub job: job::Model,
    pub previous_status: JobStatus,
    pub previous_progress: i32,
}

#[derive(Clone, Debug)]
pub enum ProgressOutcome {
    Updated {
        job: job::Model,
        previous_status: JobStatus,
        previous_progress: i32,
    },
    /// Same percent, no step change: nothing written.
    NoOp { job: job::Model },
}

#[derive(Clone, Debug)]
pub enum CancelOutcome {
    Requested {
        job: job::Model,
        was_already_requested: bool,
    },
    /// The job was already terminal; request is a no-op success.
    AlreadyTerminal { job: job::Model },
}

/// Status bump derived from a progress signal.
///
/// A 100% report never completes a job; completion needs an explicit
/// terminal transition.
pub fn heuristic_status(current: JobStatus, percent: i32) -> Option<JobStatus> {
    match (current, percent) {
        (JobStatus::Pending, 0) => Some(JobStatus::Queued),
        (JobStatus::Pending | JobStatus::Queued, p) if p > 0 => Some(JobStatus::Running),
        _ => None,
    }
}

/// Single source of truth for job records and the only writer of job state.
///
/// Every mutation is a row-locked read-modify-write committed together with
/// the audit entry it generates.
pub struct JobStore {
    db: DatabaseConnection,
}

impl JobStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn create(
        &self,
        tenant_id: String,
        class: WorkloadClass,
        priority: JobPriority,
        input: serde_json::Value,
    ) -> Result<job::Model, StoreError> {
        let model = job::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            class: Set(class),
            priority: Set(priority),
            status: Set(JobStatus::Pending),
            progress: Set(0),
            attempts: Set(1),
            retry_count: Set(0),
            cancel_requested: Set(false),
            input: Set(input),
            output: Set(None),
            metrics: Set(json!({})),
            error_code: Set(None),
            error_message: Set(None),
            task_id: Set(None),
            created_at: Set(Utc::now()),
            started_at: Set(None),
            finished_at: Set(None),
        };
        Ok(model.insert(&self.db).await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<job::Model, StoreError> {
        job::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    /// Audit trail for a job, oldest first.
    pub async fn list_audit(&self, id: Uuid) -> Result<Vec<job_audit::Model>, StoreError> {
        // Distinguish "no history" from "no such job".
        self.get(id).await?;

        Ok(job_audit::Entity::find()
            .filter(job_audit::Column::JobId.eq(id))
            .order_by_asc(job_audit::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    async fn lock_row(txn: &DatabaseTransaction, id: Uuid) -> Result<job::Model, StoreError> {
        job::Entity::find_by_id(id)
            .lock(LockType::Update)
            .one(txn)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn append_audit(
        txn: &DatabaseTransaction,
        job_id: Uuid,
        event: &str,
        from: Option<JobStatus>,
        to: Option<JobStatus>,
        detail: serde_json::Value,
    ) -> Result<(), DbErr> {
        job_audit::ActiveModel {
            job_id: Set(job_id),
            event: Set(event.to_string()),
            from_status: Set(from.map(|s| s.to_string())),
            to_status: Set(to.map(|s| s.to_string())),
            detail: Set(detail),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(txn)
        .await?;
        Ok(())
    }

    /// Apply a status transition, enforcing the state machine.
    ///
    /// Illegal transitions fail with a typed error and roll back. The audit
    /// entry commits in the same transaction as the state change.
    pub async fn transition(
        &self,
        id: Uuid,
        new_status: JobStatus,
        patch: StatusPatch,
    ) -> Result<TransitionOutcome, StoreError> {
        let txn = self.db.begin().await?;
        let current = Self::lock_row(&txn, id).await?;
        let previous_status = current.status;
        let previous_progress = current.progress;

        if !previous_status.can_transition(new_status) {
            return Err(StoreError::IllegalTransition {
                from: previous_status,
                to: new_status,
            });
        }

        let now = Utc::now();
        let mut metrics = current.metrics.clone();
        if let Some(map) = metrics.as_object_mut() {
            map.insert(
                "last_status_change".into(),
                json!({
                    "timestamp": now,
                    "from_status": previous_status.as_str(),
                    "to_status": new_status.as_str(),
                    "error_code": patch.error_code,
                }),
            );
            if let Some(serde_json::Value::Object(extra)) = &patch.metrics {
                for (key, value) in extra {
                    map.insert(key.clone(), value.clone());
                }
            }
        }

        let mut update = job::ActiveModel {
            id: Set(id),
            status: Set(new_status),
            metrics: Set(metrics),
            ..Default::default()
        };

        if new_status == JobStatus::Running && current.started_at.is_none() {
            update.started_at = Set(Some(now));
        }
        if new_status.is_terminal() {
            update.finished_at = Set(Some(now));
        }
        if new_status == JobStatus::Completed {
            update.progress = Set(100);
        } else if let Some(progress) = patch.final_progress {
            update.progress = Set(progress.clamp(current.progress, 100));
        }
        if new_status == JobStatus::Retrying {
            update.retry_count = Set(current.retry_count + 1);
        }
        if let Some(attempts) = patch.attempts {
            update.attempts = Set(attempts.max(current.attempts));
        }
        if let Some(code) = &patch.error_code {
            update.error_code = Set(Some(code.clone()));
        }
        if let Some(message) = &patch.error_message {
            update.error_message = Set(Some(message.clone()));
        }
        if let Some(output) = &patch.output {
            update.output = Set(Some(output.clone()));
        }
        if let Some(task_id) = &patch.task_id {
            update.task_id = Set(Some(task_id.clone()));
        }

        let updated = update.update(&txn).await?;

        Self::append_audit(
            &txn,
            id,
            "status_changed",
            Some(previous_status),
            Some(new_status),
            json!({
                "error_code": patch.error_code,
                "error_message": patch.error_message,
            }),
        )
        .await?;

        txn.commit().await?;

        Ok(TransitionOutcome {
            job: updated,
            previous_status,
            previous_progress,
        })
    }

    /// Persist a progress update; progress is monotonically non-decreasing.
    ///
    /// Rejections (decrease, terminal state) surface to the caller so worker
    /// code can log and continue.
    pub async fn update_progress(
        &self,
        id: Uuid,
        percent: i32,
        step: Option<String>,
        message: Option<String>,
        metrics_patch: Option<serde_json::Value>,
    ) -> Result<ProgressOutcome, StoreError> {
        let percent = percent.clamp(0, 100);
        let txn = self.db.begin().await?;
        let current = Self::lock_row(&txn, id).await?;

        if current.status.is_terminal() {
            return Err(StoreError::Terminal(current.status));
        }
        if percent < current.progress {
            return Err(StoreError::ProgressDecrease {
                current: current.progress,
                requested: percent,
            });
        }
        if percent == current.progress && step.is_none() {
            txn.commit().await?;
            return Ok(ProgressOutcome::NoOp { job: current });
        }

        let previous_status = current.status;
        let previous_progress = current.progress;
        let now = Utc::now();

        let mut metrics = current.metrics.clone();
        if let Some(map) = metrics.as_object_mut() {
            map.insert("last_progress_update".into(), json!(now));
            map.insert("progress_percent".into(), json!(percent));
            if let Some(step) = &step {
                map.insert("progress_step".into(), json!(step));
            }
            if let Some(message) = &message {
                map.insert("progress_message".into(), json!(message));
            }
            if let Some(serde_json::Value::Object(extra)) = &metrics_patch {
                for (key, value) in extra {
                    map.insert(key.clone(), value.clone());
                }
            }
        }

        let new_status = heuristic_status(previous_status, percent).unwrap_or(previous_status);

        let mut update = job::ActiveModel {
            id: Set(id),
            progress: Set(percent),
            metrics: Set(metrics),
            ..Default::default()
        };
        if new_status != previous_status {
            update.status = Set(new_status);
            if new_status == JobStatus::Running && current.started_at.is_none() {
                update.started_at = Set(Some(now));
            }
        }

        let updated = update.update(&txn).await?;

        if matches!(percent, 25 | 50 | 75 | 100) || new_status != previous_status {
            let changed = new_status != previous_status;
            Self::append_audit(
                &txn,
                id,
                "progress",
                changed.then_some(previous_status),
                changed.then_some(new_status),
                json!({
                    "percent": percent,
                    "step": step,
                    "message": message,
                    "previous_progress": previous_progress,
                }),
            )
            .await?;
        }

        txn.commit().await?;

        Ok(ProgressOutcome::Updated {
            job: updated,
            previous_status,
            previous_progress,
        })
    }

    /// Record cancel intent. Idempotent; the flag is monotone and a request
    /// against a terminal job is a no-op success.
    pub async fn mark_cancel_requested(
        &self,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<CancelOutcome, StoreError> {
        let txn = self.db.begin().await?;
        let current = Self::lock_row(&txn, id).await?;

        if current.status.is_terminal() {
            Self::append_audit(
                &txn,
                id,
                "cancel_request_ignored",
                Some(current.status),
                None,
                json!({ "reason": format!("job already {}", current.status) }),
            )
            .await?;
            txn.commit().await?;
            return Ok(CancelOutcome::AlreadyTerminal { job: current });
        }

        let was_already_requested = current.cancel_requested;
        let now = Utc::now();

        let mut metrics = current.metrics.clone();
        if let Some(map) = metrics.as_object_mut() {
            map.insert(
                "cancellation".into(),
                json!({
                    "requested_at": now,
                    "reason": reason,
                    "previous_status": current.status.as_str(),
                }),
            );
        }

        let update = job::ActiveModel {
            id: Set(id),
            cancel_requested: Set(true),
            metrics: Set(metrics),
            ..Default::default()
        };
        let updated = update.update(&txn).await?;

        Self::append_audit(
            &txn,
            id,
            "cancel_requested",
            Some(updated.status),
            None,
            json!({
                "reason": reason,
                "was_already_requested": was_already_requested,
            }),
        )
        .await?;

        txn.commit().await?;

        Ok(CancelOutcome::Requested {
            job: updated,
            was_already_requested,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_zero_progress_queues_pending_job() {
        assert_eq!(
            heuristic_status(JobStatus::Pending, 0),
            Some(JobStatus::Queued)
        );
        assert_eq!(heuristic_status(JobStatus::Queued, 0), None);
    }

    #[test]
    fn test_heuristic_positive_progress_means_running() {
        assert_eq!(
            heuristic_status(JobStatus::Pending, 1),
            Some(JobStatus::Running)
        );
        assert_eq!(
            heuristic_status(JobStatus::Queued, 42),
            Some(JobStatus::Running)
        );
        assert_eq!(heuristic_status(JobStatus::Running, 42), None);
    }

    #[test]
    fn test_heuristic_never_completes() {
        assert_eq!(heuristic_status(JobStatus::Running, 100), None);
        assert_eq!(
            heuristic_status(JobStatus::Queued, 100),
            Some(JobStatus::Running)
        );
    }
}
