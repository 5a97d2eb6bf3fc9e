use std::sync::Arc;

use futures::StreamExt;
use lapin::Channel;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions};
use lapin::types::{AMQPValue, ShortString};
use tracing::{error, info, warn};

use common::queue::HEADER_TASK_ID;
use common::retry::RetryPolicy;
use common::taxonomy::{ErrorMetadata, WorkloadError};
use common::{JobMessage, JobStatus, WorkloadClass};
use jobs::store::{StatusPatch, StoreError};
use jobs::{
    CancellationService, Dispatcher, Disposition, DlqHandler, FailureContext, ProgressService,
};
use mq::queue_consumer;

use crate::context::JobContext;
use crate::error::{Result, WorkerError};
use crate::handlers::HandlerRegistry;

/// Services the harness drives a job through.
pub struct WorkerServices {
    pub progress: Arc<ProgressService>,
    pub cancel: Arc<CancellationService>,
    pub dispatcher: Arc<Dispatcher>,
    pub dlq: Arc<DlqHandler>,
    pub handlers: Arc<HandlerRegistry>,
    pub worker_id: String,
}

/// How to settle the delivery with the broker once state is committed.
enum Settle {
    Ack,
    Requeue,
}

/// Consume one class's primary queue until the stream ends.
pub async fn run_consumer(
    services: Arc<WorkerServices>,
    channel: Channel,
    class: WorkloadClass,
    prefetch: u16,
) -> Result<()> {
    let tag = format!("{}-{}", services.worker_id, class);
    let mut consumer = queue_consumer(&channel, class.as_str(), &tag, prefetch).await?;

    while let Some(delivery) = consumer.next().await {
        match delivery {
            Ok(delivery) => process_delivery(&services, class, delivery).await,
            Err(e) => {
                error!(%class, error = %e, "Consumer stream failed");
                return Err(WorkerError::Mq(e.into()));
            }
        }
    }

    Ok(())
}

async fn process_delivery(services: &WorkerServices, class: WorkloadClass, delivery: Delivery) {
    let message: JobMessage = match serde_json::from_slice(&delivery.data) {
        Ok(m) => m,
        Err(e) => {
            error!(%class, error = %e, "Undecodable message, rejecting without requeue");
            // The broker dead-letters the raw message via the queue's DLX.
            if let Err(reject_err) = delivery
                .reject(BasicRejectOptions { requeue: false })
                .await
            {
                error!(error = %reject_err, "Reject failed");
            }
            return;
        }
    };

    let headers = headers_as_json(&delivery);
    let task_id =
        header_string(&delivery, HEADER_TASK_ID).unwrap_or_else(|| message.job_id.to_string());

    let settle = run_job(services, class, &message, &task_id, headers).await;

    match settle {
        Settle::Ack => {
            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                error!(job_id = %message.job_id, error = %e, "Ack failed");
            }
        }
        Settle::Requeue => {
            if let Err(e) = delivery
                .nack(BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                })
                .await
            {
                error!(job_id = %message.job_id, error = %e, "Nack failed");
            }
        }
    }
}

async fn run_job(
    services: &WorkerServices,
    class: WorkloadClass,
    message: &JobMessage,
    task_id: &str,
    headers: serde_json::Value,
) -> Settle {
    let job_id = message.job_id;

    // A job cancelled before pickup goes terminal without running the body.
    if let Err(WorkloadError::Cancelled { .. }) = services.cancel.check(job_id).await {
        info!(%job_id, "Cancelled before pickup");
        match services.cancel.finalize(job_id, None, Some("pickup")).await {
            Ok(_) => return Settle::Ack,
            Err(e) => {
                error!(%job_id, error = %e, "Failed to finalize pre-pickup cancellation");
                return Settle::Requeue;
            }
        }
    }

    match services
        .progress
        .set_status(
            job_id,
            JobStatus::Running,
            StatusPatch {
                attempts: Some(message.attempt as i32),
                task_id: Some(task_id.to_string()),
                ..Default::default()
            },
        )
        .await
    {
        Ok(job) if job.status.is_terminal() => {
            info!(%job_id, status = %job.status, "Record already terminal, dropping message");
            return Settle::Ack;
        }
        Ok(_) => {}
        Err(StoreError::IllegalTransition {
            from: JobStatus::Running,
            to: JobStatus::Running,
        }) => {
            // Redelivery after worker loss; the record never left running.
            warn!(%job_id, attempt = message.attempt, "Resuming redelivered running job");
        }
        Err(StoreError::NotFound(_)) => {
            warn!(%job_id, "No record for message, dropping");
            return Settle::Ack;
        }
        Err(e) => {
            error!(%job_id, error = %e, "Failed to mark running");
            return Settle::Requeue;
        }
    }

    let policy = RetryPolicy::for_class(class);

    let Some(handler) = services.handlers.get(class) else {
        let err = WorkloadError::Internal(format!("no handler registered for class {class}"));
        return settle_failure(services, class, message, task_id, headers, &err).await;
    };

    info!(
        %job_id,
        %class,
        attempt = message.attempt,
        handler = handler.name(),
        "Processing job"
    );

    let ctx = JobContext::new(
        job_id,
        class,
        message.attempt,
        message.payload.clone(),
        policy.soft_time_limit,
        services.cancel.clone(),
        services.progress.clone(),
    );

    let outcome = match tokio::time::timeout(policy.hard_time_limit, handler.run(&ctx)).await {
        Ok(result) => result,
        Err(_) => Err(WorkloadError::Timeout(format!(
            "hard time limit of {}s exceeded",
            policy.hard_time_limit.as_secs()
        ))),
    };

    match outcome {
        Ok(output) => {
            let _ = services
                .progress
                .report(job_id, 100, Some("completed".into()), None, None, true)
                .await;
            match services
                .progress
                .set_status(
                    job_id,
                    JobStatus::Completed,
                    StatusPatch {
                        output: Some(output),
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(_) => {
                    info!(%job_id, attempt = message.attempt, "Job completed");
                    Settle::Ack
                }
                Err(e) => {
                    error!(%job_id, error = %e, "Failed to mark completed");
                    Settle::Requeue
                }
            }
        }
        Err(err) => settle_failure(services, class, message, task_id, headers, &err).await,
    }
}

/// Route a failed attempt through the DLQ handler, then schedule the retry
/// publish when one was granted. The delivery is acked only after state has
/// committed.
async fn settle_failure(
    services: &WorkerServices,
    class: WorkloadClass,
    message: &JobMessage,
    task_id: &str,
    headers: serde_json::Value,
    err: &WorkloadError,
) -> Settle {
    let ctx = FailureContext {
        job_id: message.job_id,
        tenant_id: message.tenant_id.clone(),
        task_id: task_id.to_string(),
        task_name: class.as_str().to_string(),
        class,
        priority: message.priority,
        attempt: message.attempt,
        headers,
        input: message.payload.clone(),
    };

    match services.dlq.handle_failure(&ctx, err).await {
        Ok(Disposition::Retry { delay }) => {
            // The delivery stays unacked through the backoff sleep, so a
            // worker death here redelivers instead of losing the retry.
            tokio::time::sleep(delay).await;

            let next = message.next_attempt();
            let metadata = ErrorMetadata::from_error(err);
            match services.dispatcher.publish_retry(&next, &metadata).await {
                Ok(new_task_id) => {
                    if let Err(e) = services
                        .progress
                        .set_status(
                            message.job_id,
                            JobStatus::Queued,
                            StatusPatch {
                                task_id: Some(new_task_id),
                                // The record now tracks the attempt in flight.
                                attempts: Some(next.attempt as i32),
                                ..Default::default()
                            },
                        )
                        .await
                    {
                        error!(job_id = %message.job_id, error = %e, "Failed to mark queued after retry publish");
                    }
                    Settle::Ack
                }
                Err(e) => {
                    error!(job_id = %message.job_id, error = %e, "Retry publish failed, marking job failed");
                    let _ = services
                        .progress
                        .set_status(
                            message.job_id,
                            JobStatus::Failed,
                            StatusPatch {
                                error_code: Some("transport_error".into()),
                                error_message: Some(e.to_string()),
                                ..Default::default()
                            },
                        )
                        .await;
                    Settle::Ack
                }
            }
        }
        Ok(Disposition::Cancelled) | Ok(Disposition::DeadLetter { .. }) => Settle::Ack,
        Err(e) => {
            error!(job_id = %message.job_id, error = %e, "Failure handling did not commit, requeueing");
            Settle::Requeue
        }
    }
}

fn headers_as_json(delivery: &Delivery) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    if let Some(table) = delivery.properties.headers().as_ref() {
        for (key, value) in table.inner() {
            let value = match value {
                AMQPValue::LongString(s) => serde_json::Value::String(s.to_string()),
                AMQPValue::ShortString(s) => serde_json::Value::String(s.to_string()),
                AMQPValue::LongInt(i) => serde_json::Value::from(*i),
                AMQPValue::LongLongInt(i) => serde_json::Value::from(*i),
                AMQPValue::Boolean(b) => serde_json::Value::Bool(*b),
                other => serde_json::Value::String(format!("{other:?}")),
            };
            map.insert(key.to_string(), value);
        }
    }
    serde_json::Value::Object(map)
}

fn header_string(delivery: &Delivery, key: &str) -> Option<String> {
    delivery
        .properties
        .headers()
        .as_ref()
        .and_then(|table| table.inner().get(&ShortString::from(key)))
        .and_then(|value| match value {
            AMQPValue::LongString(s) => Some(s.to_string()),
            _ => None,
        })
}
