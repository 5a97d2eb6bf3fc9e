use std::sync::Arc;

use lapin::types::{AMQPValue, FieldTable};
use tracing::{debug, error, info};

use common::event::JobStatusChanged;
use common::queue::{
    EVENT_ROUTING_KEY, EVENTS_EXCHANGE, HEADER_ATTEMPT, HEADER_EVENT_TYPE, HEADER_JOB_ID,
    HEADER_STATUS,
};
use mq::publisher::{Publisher, json_properties};

use crate::cache::{Cache, SetNx};

/// TTL of the per-(job, status, attempt) dedup entry.
pub const EVENT_DEDUP_TTL_SECS: u64 = 300;

/// Publishes lifecycle events to the `events.jobs` topic exchange.
///
/// At most one event per (job, status, attempt) while the dedup cache is up;
/// without it, delivery degrades to at-least-once. Publish failures are
/// logged and never propagate into state changes.
pub struct EventPublisher {
    publisher: Arc<Publisher>,
    cache: Arc<Cache>,
}

impl EventPublisher {
    pub fn new(publisher: Arc<Publisher>, cache: Arc<Cache>) -> Self {
        Self { publisher, cache }
    }

    /// Returns true when the event is on the exchange or was already
    /// published by someone else.
    pub async fn publish_status_changed(&self, event: &JobStatusChanged) -> bool {
        match self
            .cache
            .set_nx_ex(
                &event.dedup_key(),
                &event.timestamp.to_rfc3339(),
                EVENT_DEDUP_TTL_SECS,
            )
            .await
        {
            SetNx::Exists => {
                debug!(
                    job_id = %event.job_id,
                    status = %event.status,
                    attempt = event.attempt,
                    "Skipping duplicate status event"
                );
                return true;
            }
            SetNx::Set | SetNx::Unavailable => {}
        }

        let mut headers = FieldTable::default();
        headers.insert(
            HEADER_JOB_ID.into(),
            AMQPValue::LongString(event.job_id.to_string().into()),
        );
        headers.insert(
            HEADER_EVENT_TYPE.into(),
            AMQPValue::LongString(event.event_type.clone().into()),
        );
        headers.insert(
            HEADER_STATUS.into(),
            AMQPValue::LongString(event.status.to_string().into()),
        );
        headers.insert(HEADER_ATTEMPT.into(), AMQPValue::LongInt(event.attempt));

        let properties = json_properties()
            .with_message_id(event.event_id.to_string().into())
            .with_headers(headers);

        match self
            .publisher
            .publish_json(EVENTS_EXCHANGE, EVENT_ROUTING_KEY, event, properties)
            .await
        {
            Ok(()) => {
                info!(
                    event_id = %event.event_id,
                    job_id = %event.job_id,
                    status = %event.status,
                    progress = event.progress,
                    attempt = event.attempt,
                    "Published status event"
                );
                true
            }
            Err(e) => {
                error!(
                    job_id = %event.job_id,
                    status = %event.status,
                    error = %e,
                    "Failed to publish status event"
                );
                false
            }
        }
    }
}
