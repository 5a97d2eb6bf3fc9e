use std::sync::Arc;
use std::time::Duration;

use lapin::Connection;
use sea_orm::DatabaseConnection;
use tracing::{error, info, warn};

use jobs::dlq::dlq_service;
use mq::topology::inspect_queues;

/// Periodic queue-depth and DLQ watcher.
///
/// Everything here is observational; the monitor never touches job state.
pub async fn run_queue_monitor(
    connection: Arc<Connection>,
    db: DatabaseConnection,
    interval_secs: u64,
) {
    info!(interval_secs, "Starting queue monitor");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match inspect_queues(&connection).await {
            Ok(report) => {
                for queue in &report {
                    info!(
                        queue = %queue.name,
                        messages = queue.message_count,
                        consumers = queue.consumer_count,
                        "Queue depth"
                    );
                }
                for queue in report
                    .iter()
                    .filter(|q| q.name.ends_with("_dlq") && q.message_count > 0)
                {
                    warn!(
                        queue = %queue.name,
                        messages = queue.message_count,
                        "Dead letter queue is not empty"
                    );
                }
            }
            Err(e) => error!(error = %e, "Queue inspection failed"),
        }

        match dlq_service(&db).stats().await {
            Ok(stats) if stats.total_unresolved > 0 => {
                warn!(
                    unresolved = stats.total_unresolved,
                    "Unresolved dead-lettered jobs await review"
                );
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "DLQ stats query failed"),
        }
    }
}
