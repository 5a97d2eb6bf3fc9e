use lapin::options::{BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Consumer};
use tracing::info;

use crate::error::MqError;

/// Set QoS and start a manual-ack consumer on a queue.
///
/// Late acknowledgement is the contract: a delivery is acked only after the
/// terminal transition committed or a retry was scheduled, so the broker
/// requeues on worker loss.
pub async fn queue_consumer(
    channel: &Channel,
    queue: &str,
    consumer_tag: &str,
    prefetch: u16,
) -> Result<Consumer, MqError> {
    channel
        .basic_qos(prefetch, BasicQosOptions::default())
        .await?;

    let consumer = channel
        .basic_consume(
            queue,
            consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(queue, consumer_tag, prefetch, "Consumer started");
    Ok(consumer)
}
