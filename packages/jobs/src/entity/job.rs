use common::{JobPriority, JobStatus, WorkloadClass};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A submitted job and its lifecycle state.
///
/// This row is the source of truth; the broker only owns the in-flight
/// message. All mutations go through the state store under a row lock.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "job")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Submitting tenant; rate limits and quotas are scoped to it.
    #[sea_orm(indexed)]
    pub tenant_id: String,

    #[sea_orm(indexed)]
    pub class: WorkloadClass,
    pub priority: JobPriority,

    #[sea_orm(indexed)]
    pub status: JobStatus,

    /// Monotonically non-decreasing, 0..=100.
    pub progress: i32,

    /// 1-based count of attempts handed to a worker.
    pub attempts: i32,
    /// Incremented only when a retry is scheduled.
    pub retry_count: i32,

    /// Monotone: once set it is never cleared.
    pub cancel_requested: bool,

    /// Opaque workload input.
    #[sea_orm(column_type = "JsonBinary")]
    pub input: serde_json::Value,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub output: Option<serde_json::Value>,

    /// Free-form map for step names, human messages and update breadcrumbs.
    /// Nothing invariant-bearing lives here.
    #[sea_orm(column_type = "JsonBinary")]
    pub metrics: serde_json::Value,

    /// Machine-readable error code. Only set on failure kinds.
    pub error_code: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    /// Broker task id correlating the in-flight message.
    pub task_id: Option<String>,

    pub created_at: DateTimeUtc,
    pub started_at: Option<DateTimeUtc>,
    pub finished_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}
