use std::sync::Arc;

use lapin::types::{AMQPValue, FieldTable};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use common::queue::{
    HEADER_ATTEMPT, HEADER_LAST_EXCEPTION, HEADER_RECOVERED_FROM_DLQ, HEADER_TASK_ID,
    JOBS_EXCHANGE, MAX_MESSAGE_BYTES, routing_key,
};
use common::{ErrorMetadata, JobMessage, JobPriority, JobStatus, WorkloadClass};
use mq::MqError;
use mq::publisher::{Publisher, json_properties};

use crate::progress::ProgressService;
use crate::store::{JobStore, StatusPatch, StoreError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("payload of {size} bytes exceeds the {limit} byte message cap")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("publish failed: {0}")]
    Transport(#[from] MqError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Accepts submissions and turns them into confirmed broker messages.
///
/// The only transition the dispatcher performs is `pending -> queued`, on
/// publisher confirm. A publish that never confirms marks the record
/// `failed` with a transport error code.
pub struct Dispatcher {
    store: Arc<JobStore>,
    progress: Arc<ProgressService>,
    publisher: Arc<Publisher>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<JobStore>,
        progress: Arc<ProgressService>,
        publisher: Arc<Publisher>,
    ) -> Self {
        Self {
            store,
            progress,
            publisher,
        }
    }

    /// Submit a job for a tenant. Returns the new job id once the record
    /// exists; the record is `queued` when the broker confirmed the message.
    pub async fn submit(
        &self,
        tenant_id: String,
        class: WorkloadClass,
        input: serde_json::Value,
        priority: JobPriority,
    ) -> Result<Uuid, DispatchError> {
        self.submit_inner(tenant_id, class, input, priority, false)
            .await
    }

    /// Submission path for DLQ recovery: same contract, plus the recovery
    /// marker header and a fresh attempt counter.
    pub async fn submit_recovered(
        &self,
        tenant_id: String,
        class: WorkloadClass,
        input: serde_json::Value,
        priority: JobPriority,
    ) -> Result<Uuid, DispatchError> {
        self.submit_inner(tenant_id, class, input, priority, true)
            .await
    }

    async fn submit_inner(
        &self,
        tenant_id: String,
        class: WorkloadClass,
        input: serde_json::Value,
        priority: JobPriority,
        recovered: bool,
    ) -> Result<Uuid, DispatchError> {
        let size = serde_json::to_vec(&input)?.len();
        if size > MAX_MESSAGE_BYTES {
            return Err(DispatchError::PayloadTooLarge {
                size,
                limit: MAX_MESSAGE_BYTES,
            });
        }

        let job = self
            .store
            .create(tenant_id.clone(), class, priority, input.clone())
            .await?;
        let message = JobMessage::new(job.id, tenant_id, class, priority, input);
        let task_id = Uuid::new_v4().to_string();

        match self
            .publish_attempt(&message, &task_id, None, recovered)
            .await
        {
            Ok(()) => {
                self.progress
                    .set_status(
                        job.id,
                        JobStatus::Queued,
                        StatusPatch {
                            task_id: Some(task_id.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                info!(
                    job_id = %job.id,
                    tenant_id = %job.tenant_id,
                    %class,
                    priority = %priority,
                    task_id = %task_id,
                    recovered,
                    "Job enqueued"
                );
                Ok(job.id)
            }
            Err(e) => {
                error!(job_id = %job.id, %class, error = %e, "Publish failed, marking job failed");
                let _ = self
                    .progress
                    .set_status(
                        job.id,
                        JobStatus::Failed,
                        StatusPatch {
                            error_code: Some("transport_error".into()),
                            error_message: Some(e.to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                Err(DispatchError::Transport(e))
            }
        }
    }

    /// Publish one attempt of a job message with its correlation headers.
    pub async fn publish_attempt(
        &self,
        message: &JobMessage,
        task_id: &str,
        last_exception: Option<&ErrorMetadata>,
        recovered: bool,
    ) -> Result<(), MqError> {
        let mut headers = FieldTable::default();
        headers.insert(
            HEADER_TASK_ID.into(),
            AMQPValue::LongString(task_id.to_string().into()),
        );
        headers.insert(
            HEADER_ATTEMPT.into(),
            AMQPValue::LongInt(message.attempt as i32),
        );
        if let Some(meta) = last_exception {
            headers.insert(
                HEADER_LAST_EXCEPTION.into(),
                AMQPValue::LongString(serde_json::to_string(meta)?.into()),
            );
        }
        if recovered {
            headers.insert(HEADER_RECOVERED_FROM_DLQ.into(), AMQPValue::Boolean(true));
        }

        let properties = json_properties()
            .with_priority(message.priority.step())
            .with_message_id(task_id.to_string().into())
            .with_headers(headers);

        self.publisher
            .publish_json(JOBS_EXCHANGE, &routing_key(message.class), message, properties)
            .await
    }

    /// Re-queue the next attempt after a retryable failure. Returns the new
    /// broker task id.
    pub async fn publish_retry(
        &self,
        message: &JobMessage,
        last_exception: &ErrorMetadata,
    ) -> Result<String, MqError> {
        let task_id = Uuid::new_v4().to_string();
        self.publish_attempt(message, &task_id, Some(last_exception), false)
            .await?;
        Ok(task_id)
    }
}
