use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::JobStatus;
use jobs::dlq::dlq_service;
use jobs::entity::job;
use jobs::{ProgressService, StatusPatch};
use sea_orm::{ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::StuckJobConfig;

/// Run the stuck-job detector as a background task.
pub async fn run_stuck_job_detector(
    db: DatabaseConnection,
    progress: Arc<ProgressService>,
    config: StuckJobConfig,
) {
    info!(
        timeout_secs = config.timeout_secs,
        scan_interval_secs = config.scan_interval_secs,
        "Starting stuck job detector"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(config.scan_interval_secs));

    loop {
        interval.tick().await;

        if let Err(e) = detect_and_handle_stuck_jobs(&db, &progress, config.timeout_secs).await {
            error!(error = %e, "Stuck job detection failed");
        }
    }
}

/// Scan for jobs that never got picked up and move them to `timeout`.
///
/// The stale broker message dead-letters on its own through the primary
/// queue's TTL; only the record needs the terminal state.
async fn detect_and_handle_stuck_jobs(
    db: &DatabaseConnection,
    progress: &ProgressService,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let threshold = Utc::now() - chrono::Duration::seconds(timeout_secs as i64);

    let stuck_ids: Vec<Uuid> = job::Entity::find()
        .select_only()
        .column(job::Column::Id)
        .filter(
            Condition::any()
                .add(job::Column::Status.eq(JobStatus::Pending))
                .add(job::Column::Status.eq(JobStatus::Queued)),
        )
        .filter(job::Column::CreatedAt.lt(threshold))
        .into_tuple()
        .all(db)
        .await?;

    if stuck_ids.is_empty() {
        return Ok(());
    }

    info!(count = stuck_ids.len(), "Found stuck jobs, timing them out");

    for job_id in stuck_ids {
        if dlq_service(db).has_unresolved_for_job(job_id).await? {
            warn!(%job_id, "Job already has an unresolved DLQ record, skipping");
            continue;
        }

        match progress
            .set_status(
                job_id,
                JobStatus::Timeout,
                StatusPatch {
                    error_code: Some("timeout".into()),
                    error_message: Some(format!("not picked up within {timeout_secs}s")),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(_) => info!(%job_id, "Stuck job moved to timeout"),
            Err(e) => error!(%job_id, error = %e, "Failed to time out stuck job"),
        }
    }

    Ok(())
}
