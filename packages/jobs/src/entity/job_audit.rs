use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Audit trail entry, written in the same transaction as the state change it
/// records.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "job_audit")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub job_id: Uuid,

    /// What happened: "status_changed", "progress", "cancel_requested".
    #[sea_orm(indexed)]
    pub event: String,

    pub from_status: Option<String>,
    pub to_status: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub detail: serde_json::Value,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
