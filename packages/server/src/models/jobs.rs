use chrono::{DateTime, Utc};
use common::{JobPriority, JobStatus, WorkloadClass};
use jobs::entity::{job, job_audit};
use jobs::progress::ProgressInfo;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema)]
pub struct SubmitJobRequest {
    /// Submitting tenant; rate limits are scoped to it.
    pub tenant_id: String,
    pub class: WorkloadClass,
    #[schema(value_type = Object)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub priority: JobPriority,
}

#[derive(Serialize, ToSchema)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
}

#[derive(Deserialize, utoipa::IntoParams)]
pub struct CancelJobParams {
    /// Optional cancellation reason, recorded in the audit trail.
    pub reason: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct CancelJobResponse {
    pub cancel_requested: bool,
    pub status: JobStatus,
}

#[derive(Serialize, ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    pub tenant_id: String,
    pub class: WorkloadClass,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub progress: i32,
    pub attempts: i32,
    pub retry_count: i32,
    pub cancel_requested: bool,
    #[schema(value_type = Object)]
    pub output: Option<serde_json::Value>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<job::Model> for JobResponse {
    fn from(job: job::Model) -> Self {
        Self {
            id: job.id,
            tenant_id: job.tenant_id,
            class: job.class,
            priority: job.priority,
            status: job.status,
            progress: job.progress,
            attempts: job.attempts,
            retry_count: job.retry_count,
            cancel_requested: job.cancel_requested,
            output: job.output,
            error_code: job.error_code,
            error_message: job.error_message,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ProgressResponse {
    pub percent: i32,
    pub status: JobStatus,
    pub step: Option<String>,
    pub message: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<ProgressInfo> for ProgressResponse {
    fn from(info: ProgressInfo) -> Self {
        Self {
            percent: info.percent,
            status: info.status,
            step: info.step,
            message: info.message,
            last_update: info.last_update,
            started_at: info.started_at,
            finished_at: info.finished_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct AuditEntryResponse {
    pub event: String,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    #[schema(value_type = Object)]
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<job_audit::Model> for AuditEntryResponse {
    fn from(entry: job_audit::Model) -> Self {
        Self {
            event: entry.event,
            from_status: entry.from_status,
            to_status: entry.to_status,
            detail: entry.detail,
            created_at: entry.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct AuditTrailResponse {
    pub job_id: Uuid,
    pub entries: Vec<AuditEntryResponse>,
}
