//! Declaration of the broker topology.
//!
//! Primaries are quorum queues with a per-class TTL, a message-size cap and a
//! per-queue dead-letter exchange. DLQs are classic lazy queues with a 24 h
//! TTL and a length cap. A shared DLX would lose class separation, so every
//! class gets its own.

use lapin::options::{ExchangeBindOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ExchangeKind};
use tracing::info;

use common::queue::{
    DLQ_CATCH_ALL_KEY, DLQ_MAX_LENGTH, DLQ_MESSAGE_TTL_MS, EVENT_BINDING_KEY,
    ERP_OUTBOUND_EXCHANGE, EVENTS_EXCHANGE, JOBS_EXCHANGE, MAX_MESSAGE_BYTES, MAX_PRIORITY,
    dlq_name, dlx_name, message_ttl_ms, routing_key,
};
use common::workload::WorkloadClass;

use crate::error::MqError;

fn durable_exchange() -> ExchangeDeclareOptions {
    ExchangeDeclareOptions {
        durable: true,
        ..Default::default()
    }
}

fn durable_queue() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        ..Default::default()
    }
}

/// Arguments for a class's primary quorum queue.
pub fn primary_queue_arguments(class: WorkloadClass) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert("x-queue-type".into(), AMQPValue::LongString("quorum".into()));
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(dlx_name(class).into()),
    );
    args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(DLQ_CATCH_ALL_KEY.into()),
    );
    args.insert(
        "x-message-ttl".into(),
        AMQPValue::LongLongInt(message_ttl_ms(class)),
    );
    args.insert(
        "x-max-length-bytes".into(),
        AMQPValue::LongLongInt(MAX_MESSAGE_BYTES as i64),
    );
    args.insert(
        "x-max-priority".into(),
        AMQPValue::ShortShortUInt(MAX_PRIORITY),
    );
    args
}

/// Arguments for a dead-letter queue (classic, lazy, bounded).
pub fn dlq_arguments() -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-queue-type".into(),
        AMQPValue::LongString("classic".into()),
    );
    args.insert("x-queue-mode".into(), AMQPValue::LongString("lazy".into()));
    args.insert(
        "x-message-ttl".into(),
        AMQPValue::LongLongInt(DLQ_MESSAGE_TTL_MS),
    );
    args.insert("x-max-length".into(), AMQPValue::LongLongInt(DLQ_MAX_LENGTH));
    args
}

/// Declare the primary queue, DLX and DLQ for one class and bind them.
pub async fn declare_class_queues(channel: &Channel, class: WorkloadClass) -> Result<(), MqError> {
    let dlx = dlx_name(class);
    let dlq = dlq_name(class);

    channel
        .exchange_declare(&dlx, ExchangeKind::Direct, durable_exchange(), FieldTable::default())
        .await?;
    channel
        .queue_declare(&dlq, durable_queue(), dlq_arguments())
        .await?;
    channel
        .queue_bind(
            &dlq,
            &dlx,
            DLQ_CATCH_ALL_KEY,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_declare(class.as_str(), durable_queue(), primary_queue_arguments(class))
        .await?;
    channel
        .queue_bind(
            class.as_str(),
            JOBS_EXCHANGE,
            &routing_key(class),
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    Ok(())
}

/// Declare the full topology: jobs exchange, per-class queues with their
/// dead-letter pairs, and the event exchanges with the ERP bridge binding.
pub async fn declare_topology(channel: &Channel) -> Result<(), MqError> {
    channel
        .exchange_declare(
            JOBS_EXCHANGE,
            ExchangeKind::Direct,
            durable_exchange(),
            FieldTable::default(),
        )
        .await?;

    for class in WorkloadClass::ALL {
        declare_class_queues(channel, *class).await?;
    }

    channel
        .exchange_declare(
            EVENTS_EXCHANGE,
            ExchangeKind::Topic,
            durable_exchange(),
            FieldTable::default(),
        )
        .await?;
    channel
        .exchange_declare(
            ERP_OUTBOUND_EXCHANGE,
            ExchangeKind::Fanout,
            durable_exchange(),
            FieldTable::default(),
        )
        .await?;

    // Exchange-to-exchange binding: every job.status.* event fans out to the
    // ERP bridge without a republishing consumer.
    channel
        .exchange_bind(
            ERP_OUTBOUND_EXCHANGE,
            EVENTS_EXCHANGE,
            EVENT_BINDING_KEY,
            ExchangeBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(
        classes = WorkloadClass::ALL.len(),
        "Broker topology declared"
    );

    Ok(())
}

/// Depth snapshot of one queue, from a passive declare.
#[derive(Clone, Debug)]
pub struct QueueHealth {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Passively re-declare every queue of the topology and report its depth.
///
/// A passive declare on a missing queue fails and closes the channel, so
/// each probe gets its own.
pub async fn inspect_queues(connection: &Connection) -> Result<Vec<QueueHealth>, MqError> {
    let mut report = Vec::new();

    for class in WorkloadClass::ALL {
        for queue in [class.as_str().to_string(), dlq_name(*class)] {
            let channel = connection.create_channel().await?;
            let declared = channel
                .queue_declare(
                    &queue,
                    QueueDeclareOptions {
                        passive: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            report.push(QueueHealth {
                name: queue,
                message_count: declared.message_count(),
                consumer_count: declared.consumer_count(),
            });
            let _ = channel.close(200, "inspection done").await;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::ShortString;

    fn get<'a>(args: &'a FieldTable, key: &str) -> Option<&'a AMQPValue> {
        args.inner().get(&ShortString::from(key))
    }

    #[test]
    fn test_primary_arguments() {
        let args = primary_queue_arguments(WorkloadClass::Cam);
        assert_eq!(
            get(&args, "x-queue-type"),
            Some(&AMQPValue::LongString("quorum".into()))
        );
        assert_eq!(
            get(&args, "x-dead-letter-exchange"),
            Some(&AMQPValue::LongString("cam.dlx".into()))
        );
        assert_eq!(
            get(&args, "x-message-ttl"),
            Some(&AMQPValue::LongLongInt(2_700_000))
        );
        assert_eq!(
            get(&args, "x-max-length-bytes"),
            Some(&AMQPValue::LongLongInt(10_485_760))
        );
        assert_eq!(
            get(&args, "x-max-priority"),
            Some(&AMQPValue::ShortShortUInt(10))
        );
    }

    #[test]
    fn test_dlq_arguments() {
        let args = dlq_arguments();
        assert_eq!(
            get(&args, "x-queue-type"),
            Some(&AMQPValue::LongString("classic".into()))
        );
        assert_eq!(
            get(&args, "x-queue-mode"),
            Some(&AMQPValue::LongString("lazy".into()))
        );
        assert_eq!(
            get(&args, "x-message-ttl"),
            Some(&AMQPValue::LongLongInt(86_400_000))
        );
        assert_eq!(
            get(&args, "x-max-length"),
            Some(&AMQPValue::LongLongInt(10_000))
        );
    }

    #[test]
    fn test_each_class_has_its_own_dlx() {
        let mut seen = std::collections::HashSet::new();
        for class in WorkloadClass::ALL {
            let args = primary_queue_arguments(*class);
            let Some(AMQPValue::LongString(dlx)) = get(&args, "x-dead-letter-exchange") else {
                panic!("missing DLX for {class}");
            };
            assert!(seen.insert(dlx.to_string()), "shared DLX for {class}");
        }
    }
}
