use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lapin::types::{AMQPValue, FieldTable};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr,
};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use common::dlq::{DLQ_VERSION, DlqPayload, FailureReason};
use common::queue::{DLQ_CATCH_ALL_KEY, dlx_name};
use common::retry::RetryPolicy;
use common::taxonomy::{ErrorKind, ErrorMetadata, WorkloadError};
use common::{JobPriority, JobStatus, WorkloadClass};
use mq::publisher::{Publisher, gzip, json_properties};

use crate::cancel::CancellationService;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::entity::dead_letter_job;
use crate::progress::ProgressService;
use crate::store::{StatusPatch, StoreError};

/// Error messages recorded on the job row are truncated to this length; the
/// DLQ record keeps the full text.
const MAX_ERROR_MESSAGE_LEN: usize = 2000;

/// What to do with a failed attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Re-queue the next attempt after the backoff delay.
    Retry { delay: Duration },
    /// Dead-letter now; the job goes terminal `failed`.
    DeadLetter { reason: FailureReason },
    /// Cooperative cancellation; terminal `cancelled`, no DLQ record.
    Cancelled,
}

/// Map (classification, attempt count, policy) onto a disposition.
///
/// `attempt` is the 1-based count of attempts made, including the one that
/// just failed.
pub fn decide(kind: ErrorKind, attempt: u32, policy: &RetryPolicy) -> Disposition {
    match kind {
        ErrorKind::Fatal => Disposition::DeadLetter {
            reason: FailureReason::FatalError,
        },
        ErrorKind::Cancellation => Disposition::Cancelled,
        ErrorKind::NonRetryable => Disposition::DeadLetter {
            reason: FailureReason::NonRetryableError,
        },
        ErrorKind::Retryable => {
            if attempt >= policy.max_retries {
                Disposition::DeadLetter {
                    reason: FailureReason::MaxRetriesExceeded,
                }
            } else {
                Disposition::Retry {
                    delay: policy.retry_delay(attempt.saturating_sub(1)),
                }
            }
        }
    }
}

/// Everything the harness knows about the failed attempt.
#[derive(Clone, Debug)]
pub struct FailureContext {
    pub job_id: Uuid,
    pub tenant_id: String,
    pub task_id: String,
    pub task_name: String,
    pub class: WorkloadClass,
    pub priority: JobPriority,
    /// 1-based attempt count.
    pub attempt: u32,
    /// Original message headers, for the DLQ record.
    pub headers: serde_json::Value,
    pub input: serde_json::Value,
}

fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

/// Build the self-describing DLQ record for a terminally-failed attempt.
pub fn build_dlq_payload(
    ctx: &FailureContext,
    error: &WorkloadError,
    reason: FailureReason,
) -> DlqPayload {
    let metadata = ErrorMetadata::from_error(error);
    DlqPayload {
        task_id: ctx.task_id.clone(),
        task_name: ctx.task_name.clone(),
        original_queue: ctx.class.to_string(),
        args: serde_json::json!([]),
        kwargs: serde_json::json!({
            "input": ctx.input,
            "priority": ctx.priority,
            "tenant_id": ctx.tenant_id,
        }),
        headers: ctx.headers.clone(),
        attempt_count: ctx.attempt,
        failed_at: Utc::now(),
        error_classification: metadata.error_classification,
        recoverable: metadata.is_retryable,
        error_metadata: metadata,
        failure_reason: reason,
        dlq_version: DLQ_VERSION.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum RecoverError {
    #[error("unknown original queue '{0}'")]
    UnknownQueue(String),

    #[error("DLQ record carries no input payload")]
    MissingInput,

    #[error("DLQ record carries no tenant id")]
    MissingTenant,

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Routes classified failures: retry, cancel path, or dead-letter with a
/// structured record on the class DLX.
pub struct DlqHandler {
    progress: Arc<ProgressService>,
    cancel: Arc<CancellationService>,
    publisher: Arc<Publisher>,
    db: DatabaseConnection,
}

impl DlqHandler {
    pub fn new(
        progress: Arc<ProgressService>,
        cancel: Arc<CancellationService>,
        publisher: Arc<Publisher>,
        db: DatabaseConnection,
    ) -> Self {
        Self {
            progress,
            cancel,
            publisher,
            db,
        }
    }

    /// Decide and apply the consequences of a failed attempt. State
    /// transitions commit before the caller acks the delivery.
    pub async fn handle_failure(
        &self,
        ctx: &FailureContext,
        error: &WorkloadError,
    ) -> Result<Disposition, StoreError> {
        let policy = RetryPolicy::for_class(ctx.class);
        let disposition = decide(error.kind(), ctx.attempt, &policy);

        match &disposition {
            Disposition::Cancelled => {
                info!(
                    job_id = %ctx.job_id,
                    attempt = ctx.attempt,
                    error = %error,
                    "Attempt ended in cancellation"
                );
                self.cancel
                    .finalize(ctx.job_id, None, Some(error.error_type()))
                    .await?;
            }
            Disposition::Retry { delay } => {
                warn!(
                    job_id = %ctx.job_id,
                    class = %ctx.class,
                    attempt = ctx.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Scheduling retry"
                );
                self.progress
                    .set_status(
                        ctx.job_id,
                        JobStatus::Retrying,
                        StatusPatch {
                            error_code: Some(error.code().to_string()),
                            error_message: Some(truncate_message(&error.to_string())),
                            attempts: Some(ctx.attempt as i32),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            Disposition::DeadLetter { reason } => {
                error!(
                    job_id = %ctx.job_id,
                    class = %ctx.class,
                    attempt = ctx.attempt,
                    reason = %reason,
                    error = %error,
                    "Dead-lettering job"
                );
                let payload = build_dlq_payload(ctx, error, *reason);
                self.publish_record(&payload, ctx.class).await;
                self.persist_record(&payload, ctx.job_id).await;
                self.progress
                    .set_status(
                        ctx.job_id,
                        JobStatus::Failed,
                        StatusPatch {
                            error_code: Some(error.code().to_string()),
                            error_message: Some(truncate_message(&error.to_string())),
                            attempts: Some(ctx.attempt as i32),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }

        Ok(disposition)
    }

    /// Publish the gzip'd record to the class DLX. Best-effort: a failure
    /// here is logged, never blocks the `failed` transition.
    async fn publish_record(&self, payload: &DlqPayload, class: WorkloadClass) {
        let body = match serde_json::to_vec(payload).map_err(mq::MqError::from) {
            Ok(body) => body,
            Err(e) => {
                error!(task_id = %payload.task_id, error = %e, "Failed to encode DLQ record");
                return;
            }
        };
        let compressed = match gzip(&body) {
            Ok(c) => c,
            Err(e) => {
                error!(task_id = %payload.task_id, error = %e, "Failed to compress DLQ record");
                return;
            }
        };

        let mut headers = FieldTable::default();
        headers.insert(
            "x-failed-queue".into(),
            AMQPValue::LongString(payload.original_queue.clone().into()),
        );
        headers.insert(
            "x-failed-task".into(),
            AMQPValue::LongString(payload.task_name.clone().into()),
        );
        headers.insert(
            "x-failed-at".into(),
            AMQPValue::LongString(payload.failed_at.to_rfc3339().into()),
        );
        headers.insert(
            "x-attempt-count".into(),
            AMQPValue::LongInt(payload.attempt_count as i32),
        );

        let properties = json_properties()
            .with_content_encoding("gzip".into())
            .with_headers(headers);

        if let Err(e) = self
            .publisher
            .publish(&dlx_name(class), DLQ_CATCH_ALL_KEY, &compressed, properties)
            .await
        {
            error!(
                task_id = %payload.task_id,
                dlx = %dlx_name(class),
                error = %e,
                "Failed to publish DLQ record"
            );
        }
    }

    /// Persist the admin-surface copy of the record. Best-effort.
    async fn persist_record(&self, payload: &DlqPayload, job_id: Uuid) {
        let service = DlqService::new(&self.db);
        if let Err(e) = service.record(payload, Some(job_id)).await {
            error!(task_id = %payload.task_id, error = %e, "Failed to persist DLQ record");
        }
    }

    /// Re-submit a DLQ record as a brand-new job with a reset attempt
    /// counter. The original failed job is never mutated.
    pub async fn recover(
        &self,
        record: &DlqPayload,
        dispatcher: &Dispatcher,
        queue: Option<WorkloadClass>,
    ) -> Result<Uuid, RecoverError> {
        let class = match queue {
            Some(class) => class,
            None => record
                .original_queue
                .parse()
                .map_err(|_| RecoverError::UnknownQueue(record.original_queue.clone()))?,
        };
        let input = record
            .kwargs
            .get("input")
            .cloned()
            .ok_or(RecoverError::MissingInput)?;
        let tenant_id = record
            .kwargs
            .get("tenant_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(RecoverError::MissingTenant)?;
        let priority = record
            .kwargs
            .get("priority")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let new_job_id = dispatcher
            .submit_recovered(tenant_id, class, input, priority)
            .await?;
        info!(
            original_task_id = %record.task_id,
            %new_job_id,
            %class,
            "Recovered job from DLQ"
        );
        Ok(new_job_id)
    }
}

/// Result of attempting to resolve a persisted DLQ record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveResult {
    Resolved,
    NotFound,
    AlreadyResolved,
}

/// Statistics about the persisted DLQ records.
#[derive(Debug, Clone)]
pub struct DlqStats {
    pub total_unresolved: u64,
    pub total_resolved: u64,
    /// Unresolved record count grouped by original queue.
    pub unresolved_by_queue: HashMap<String, u64>,
    /// Unresolved record count grouped by failure reason.
    pub unresolved_by_reason: HashMap<String, u64>,
}

/// DB-backed view of dead-lettered jobs for the admin surface.
pub struct DlqService<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> DlqService<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Persist a DLQ record. Idempotent on the task id: re-delivery returns
    /// the existing row.
    pub async fn record(
        &self,
        payload: &DlqPayload,
        job_id: Option<Uuid>,
    ) -> Result<dead_letter_job::Model, DbErr> {
        let model = dead_letter_job::ActiveModel {
            task_id: Set(payload.task_id.clone()),
            job_id: Set(job_id),
            task_name: Set(payload.task_name.clone()),
            original_queue: Set(payload.original_queue.clone()),
            payload: Set(serde_json::to_value(payload).unwrap_or_default()),
            failure_reason: Set(payload.failure_reason.to_string()),
            error_classification: Set(payload.error_classification.to_string()),
            error_message: Set(payload.error_metadata.error_message.clone()),
            attempt_count: Set(payload.attempt_count as i32),
            recoverable: Set(payload.recoverable),
            failed_at: Set(payload.failed_at),
            created_at: Set(Utc::now()),
            resolved: Set(false),
            resolved_at: Set(None),
            ..Default::default()
        };

        match model.insert(self.conn).await {
            Ok(inserted) => Ok(inserted),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                dead_letter_job::Entity::find()
                    .filter(dead_letter_job::Column::TaskId.eq(&payload.task_id))
                    .one(self.conn)
                    .await?
                    .ok_or_else(|| {
                        DbErr::Custom(
                            "UniqueConstraintViolation but existing row not found".to_string(),
                        )
                    })
            }
            Err(e) => Err(e),
        }
    }

    /// List DLQ records, newest first.
    pub async fn list(
        &self,
        original_queue: Option<WorkloadClass>,
        resolved: Option<bool>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<dead_letter_job::Model>, u64), DbErr> {
        let mut query = dead_letter_job::Entity::find();

        if let Some(class) = original_queue {
            query = query.filter(dead_letter_job::Column::OriginalQueue.eq(class.to_string()));
        }
        if let Some(resolved) = resolved {
            query = query.filter(dead_letter_job::Column::Resolved.eq(resolved));
        }

        let total = query.clone().count(self.conn).await?;

        let records = query
            .order_by_desc(dead_letter_job::Column::CreatedAt)
            .offset(page.saturating_sub(1) * per_page)
            .limit(per_page)
            .all(self.conn)
            .await?;

        Ok((records, total))
    }

    pub async fn get_by_id(&self, id: i32) -> Result<Option<dead_letter_job::Model>, DbErr> {
        dead_letter_job::Entity::find_by_id(id).one(self.conn).await
    }

    /// Mark a record as resolved.
    pub async fn resolve(&self, id: i32) -> Result<ResolveResult, DbErr> {
        let update = dead_letter_job::Entity::update_many()
            .col_expr(
                dead_letter_job::Column::Resolved,
                sea_orm::sea_query::Expr::value(true),
            )
            .col_expr(
                dead_letter_job::Column::ResolvedAt,
                sea_orm::sea_query::Expr::value(Utc::now()),
            )
            .filter(dead_letter_job::Column::Id.eq(id))
            .filter(dead_letter_job::Column::Resolved.eq(false));

        let result = update.exec(self.conn).await?;
        if result.rows_affected > 0 {
            return Ok(ResolveResult::Resolved);
        }

        let exists = dead_letter_job::Entity::find_by_id(id)
            .one(self.conn)
            .await?
            .is_some();

        if exists {
            Ok(ResolveResult::AlreadyResolved)
        } else {
            Ok(ResolveResult::NotFound)
        }
    }

    pub async fn stats(&self) -> Result<DlqStats, DbErr> {
        let total_resolved = dead_letter_job::Entity::find()
            .filter(dead_letter_job::Column::Resolved.eq(true))
            .count(self.conn)
            .await?;

        let unresolved: Vec<(String, String)> = dead_letter_job::Entity::find()
            .select_only()
            .column(dead_letter_job::Column::OriginalQueue)
            .column(dead_letter_job::Column::FailureReason)
            .filter(dead_letter_job::Column::Resolved.eq(false))
            .into_tuple()
            .all(self.conn)
            .await?;

        let total_unresolved = unresolved.len() as u64;
        let mut unresolved_by_queue: HashMap<String, u64> = HashMap::new();
        let mut unresolved_by_reason: HashMap<String, u64> = HashMap::new();
        for (queue, reason) in unresolved {
            *unresolved_by_queue.entry(queue).or_insert(0) += 1;
            *unresolved_by_reason.entry(reason).or_insert(0) += 1;
        }

        Ok(DlqStats {
            total_unresolved,
            total_resolved,
            unresolved_by_queue,
            unresolved_by_reason,
        })
    }

    /// Whether a job already has an unresolved DLQ record.
    pub async fn has_unresolved_for_job(&self, job_id: Uuid) -> Result<bool, DbErr> {
        let count = dead_letter_job::Entity::find()
            .filter(dead_letter_job::Column::JobId.eq(job_id))
            .filter(dead_letter_job::Column::Resolved.eq(false))
            .count(self.conn)
            .await?;
        Ok(count > 0)
    }
}

/// Create a DlqService over a plain connection.
pub fn dlq_service(db: &DatabaseConnection) -> DlqService<'_, DatabaseConnection> {
    DlqService::new(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> FailureContext {
        FailureContext {
            job_id: Uuid::new_v4(),
            tenant_id: "acme".into(),
            task_id: "t-1".into(),
            task_name: "cam".into(),
            class: WorkloadClass::Cam,
            priority: JobPriority::High,
            attempt: 1,
            headers: serde_json::json!({"x-attempt": 1}),
            input: serde_json::json!({"n": 10}),
        }
    }

    #[test]
    fn test_fatal_and_non_retryable_dead_letter_immediately() {
        let policy = RetryPolicy::for_class(WorkloadClass::Cam);
        assert_eq!(
            decide(ErrorKind::Fatal, 1, &policy),
            Disposition::DeadLetter {
                reason: FailureReason::FatalError
            }
        );
        assert_eq!(
            decide(ErrorKind::NonRetryable, 1, &policy),
            Disposition::DeadLetter {
                reason: FailureReason::NonRetryableError
            }
        );
    }

    #[test]
    fn test_cancellation_never_dead_letters() {
        let policy = RetryPolicy::for_class(WorkloadClass::Cam);
        // Even on the last attempt.
        assert_eq!(
            decide(ErrorKind::Cancellation, policy.max_retries, &policy),
            Disposition::Cancelled
        );
    }

    #[test]
    fn test_retryable_retries_until_budget_exhausted() {
        let policy = RetryPolicy::for_class(WorkloadClass::Sim);
        for attempt in 1..policy.max_retries {
            let Disposition::Retry { delay } = decide(ErrorKind::Retryable, attempt, &policy)
            else {
                panic!("attempt {attempt} must retry");
            };
            // Delay bounds for 0-based attempt n: [0.5, 1.5] * min(cap, 2 * 2^n).
            let expected = (2f64 * 2f64.powi((attempt - 1) as i32))
                .min(policy.backoff_cap.as_secs_f64());
            let secs = delay.as_secs_f64();
            assert!(secs >= expected * 0.5 && secs <= expected * 1.5);
        }
        assert_eq!(
            decide(ErrorKind::Retryable, policy.max_retries, &policy),
            Disposition::DeadLetter {
                reason: FailureReason::MaxRetriesExceeded
            }
        );
    }

    #[test]
    fn test_dlq_payload_is_self_describing() {
        let ctx = ctx();
        let err = WorkloadError::Validation("bad geometry".into());
        let payload = build_dlq_payload(&ctx, &err, FailureReason::NonRetryableError);

        assert_eq!(payload.original_queue, "cam");
        assert_eq!(payload.attempt_count, 1);
        assert_eq!(payload.kwargs["input"]["n"], 10);
        assert_eq!(payload.kwargs["tenant_id"], "acme");
        assert!(!payload.recoverable);
        assert_eq!(payload.dlq_version, DLQ_VERSION);
        assert_eq!(payload.error_metadata.error_type, "validation");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(MAX_ERROR_MESSAGE_LEN);
        let truncated = truncate_message(&long);
        assert!(truncated.len() <= MAX_ERROR_MESSAGE_LEN);
        assert!(truncated.chars().all(|c| c == 'é'));

        let short = "fits";
        assert_eq!(truncate_message(short), "fits");
    }
}
