use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;
use uuid::Uuid;

use common::{WorkloadClass, WorkloadError};
use jobs::{CancellationService, ProgressService, StoreError};

/// Per-job context handed to a workload body.
///
/// Bodies call [`check`](JobContext::check) at safe points (between subtasks,
/// between iterations) and [`report`](JobContext::report) to publish
/// progress. Cancellation latency is bounded by the checking interval.
pub struct JobContext {
    pub job_id: Uuid,
    pub class: WorkloadClass,
    pub attempt: u32,
    pub input: serde_json::Value,
    started: Instant,
    soft_deadline: Instant,
    cancel: Arc<CancellationService>,
    progress: Arc<ProgressService>,
}

impl JobContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: Uuid,
        class: WorkloadClass,
        attempt: u32,
        input: serde_json::Value,
        soft_time_limit: Duration,
        cancel: Arc<CancellationService>,
        progress: Arc<ProgressService>,
    ) -> Self {
        let started = Instant::now();
        Self {
            job_id,
            class,
            attempt,
            input,
            started,
            soft_deadline: started + soft_time_limit,
            cancel,
            progress,
        }
    }

    /// Cancellation checkpoint.
    ///
    /// Raises a cancellation-kind error once cancel intent or the soft time
    /// limit is visible, so the body can clean up and unwind.
    pub async fn check(&self) -> Result<(), WorkloadError> {
        if Instant::now() >= self.soft_deadline {
            return Err(WorkloadError::SoftTimeLimit {
                elapsed_secs: self.started.elapsed().as_secs(),
            });
        }
        self.cancel.check(self.job_id).await
    }

    /// Report progress. Throttled upstream; rejections are logged here and
    /// never fail the body.
    pub async fn report(&self, percent: i32, step: Option<&str>, message: Option<&str>) {
        match self
            .progress
            .report(
                self.job_id,
                percent,
                step.map(str::to_string),
                message.map(str::to_string),
                None,
                false,
            )
            .await
        {
            Ok(_) => {}
            Err(StoreError::ProgressDecrease { current, requested }) => {
                warn!(
                    job_id = %self.job_id,
                    current,
                    requested,
                    "Progress report rejected (decrease), continuing"
                );
            }
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Progress report failed, continuing");
            }
        }
    }
}
