use std::collections::HashMap;

use chrono::{DateTime, Utc};
use jobs::dlq::DlqStats;
use jobs::entity::dead_letter_job;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::shared::Pagination;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListDlqParams {
    /// Filter by original queue (workload class).
    pub queue: Option<String>,
    /// Filter by resolution state.
    pub resolved: Option<bool>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Serialize, ToSchema)]
pub struct DlqRecordResponse {
    pub id: i32,
    pub task_id: String,
    pub job_id: Option<Uuid>,
    pub task_name: String,
    pub original_queue: String,
    pub failure_reason: String,
    pub error_classification: String,
    pub error_message: String,
    pub attempt_count: i32,
    pub recoverable: bool,
    pub failed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<dead_letter_job::Model> for DlqRecordResponse {
    fn from(record: dead_letter_job::Model) -> Self {
        Self {
            id: record.id,
            task_id: record.task_id,
            job_id: record.job_id,
            task_name: record.task_name,
            original_queue: record.original_queue,
            failure_reason: record.failure_reason,
            error_classification: record.error_classification,
            error_message: record.error_message,
            attempt_count: record.attempt_count,
            recoverable: record.recoverable,
            failed_at: record.failed_at,
            created_at: record.created_at,
            resolved: record.resolved,
            resolved_at: record.resolved_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct DlqRecordDetailResponse {
    #[serde(flatten)]
    pub record: DlqRecordResponse,
    /// Full DLQ record as published to the broker.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

impl From<dead_letter_job::Model> for DlqRecordDetailResponse {
    fn from(record: dead_letter_job::Model) -> Self {
        let payload = record.payload.clone();
        Self {
            record: record.into(),
            payload,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct DlqListResponse {
    pub data: Vec<DlqRecordResponse>,
    pub pagination: Pagination,
}

#[derive(Serialize, ToSchema)]
pub struct DlqStatsResponse {
    pub total_unresolved: u64,
    pub total_resolved: u64,
    pub unresolved_by_queue: HashMap<String, u64>,
    pub unresolved_by_reason: HashMap<String, u64>,
}

impl From<DlqStats> for DlqStatsResponse {
    fn from(stats: DlqStats) -> Self {
        Self {
            total_unresolved: stats.total_unresolved,
            total_resolved: stats.total_resolved,
            unresolved_by_queue: stats.unresolved_by_queue,
            unresolved_by_reason: stats.unresolved_by_reason,
        }
    }
}

#[derive(Deserialize, IntoParams)]
pub struct DlqRecoverParams {
    /// Target queue override; defaults to the record's original queue.
    pub queue: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct DlqRecoverResponse {
    pub new_job_id: Uuid,
    pub resolved: bool,
}

#[derive(Serialize, ToSchema)]
pub struct DlqResolveResponse {
    pub resolved: bool,
    pub already_resolved: bool,
}
