use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Persisted copy of a dead-lettered job record.
///
/// The broker DLQ holds the authoritative gzip'd payload; this row backs the
/// admin surface (listing, stats, recovery tracking).
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dead_letter_job")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub task_id: String,

    #[sea_orm(indexed)]
    pub job_id: Option<Uuid>,

    pub task_name: String,

    #[sea_orm(indexed)]
    pub original_queue: String,

    /// Full DLQ record as published to the broker.
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: serde_json::Value,

    /// max_retries_exceeded | non_retryable_error | fatal_error
    #[sea_orm(indexed)]
    pub failure_reason: String,

    pub error_classification: String,

    #[sea_orm(column_type = "Text")]
    pub error_message: String,

    pub attempt_count: i32,

    pub recoverable: bool,

    pub failed_at: DateTimeUtc,

    pub created_at: DateTimeUtc,

    #[sea_orm(default_value = false, indexed)]
    pub resolved: bool,

    pub resolved_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}
