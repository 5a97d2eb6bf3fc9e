use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::{BasicProperties, Channel, Connection};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::connection;
use crate::error::MqError;

/// How many times a publish is re-attempted on a fresh channel before the
/// error surfaces to the caller.
const PUBLISH_ATTEMPTS: u32 = 3;

struct PublisherChannel {
    // Held so the channel's connection stays alive.
    _connection: Connection,
    channel: Channel,
}

/// Confirmed publisher owning one long-lived broker connection.
///
/// The channel is guarded by a mutex so concurrent publishers serialize
/// cheaply; on a connection or channel failure the next attempt reconnects
/// and opens a fresh channel.
pub struct Publisher {
    url: String,
    state: Mutex<Option<PublisherChannel>>,
}

impl Publisher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: Mutex::new(None),
        }
    }

    /// Connect eagerly so startup fails fast on a bad broker URL.
    pub async fn connect(url: impl Into<String>) -> Result<Self, MqError> {
        let publisher = Self::new(url);
        {
            let mut state = publisher.state.lock().await;
            Self::ensure_channel(&publisher.url, &mut state).await?;
        }
        Ok(publisher)
    }

    async fn ensure_channel<'a>(
        url: &str,
        state: &'a mut Option<PublisherChannel>,
    ) -> Result<&'a Channel, MqError> {
        if state.is_none() {
            let conn = connection::connect(url, 3).await?;
            let channel = conn.create_channel().await?;
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await?;
            debug!("Opened publisher channel with confirms enabled");
            *state = Some(PublisherChannel {
                _connection: conn,
                channel,
            });
        }
        match state {
            Some(chan) => Ok(&chan.channel),
            None => Err(MqError::Connection("publisher channel unavailable".into())),
        }
    }

    /// Publish and wait for the broker confirm.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<(), MqError> {
        let mut state = self.state.lock().await;
        let mut last_err = MqError::Connection("publish never attempted".into());

        for attempt in 1..=PUBLISH_ATTEMPTS {
            let channel = match Self::ensure_channel(&self.url, &mut state).await {
                Ok(c) => c,
                Err(e) => {
                    last_err = e;
                    continue;
                }
            };

            match Self::publish_once(channel, exchange, routing_key, body, properties.clone()).await
            {
                Ok(()) => return Ok(()),
                Err(e @ MqError::NotConfirmed(_)) => return Err(e),
                Err(e) => {
                    warn!(
                        exchange,
                        routing_key,
                        attempt,
                        error = %e,
                        "Publish failed, reopening channel"
                    );
                    *state = None;
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    async fn publish_once(
        channel: &Channel,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<(), MqError> {
        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?
            .await?;

        match confirm {
            Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
            Confirmation::Nack(_) => Err(MqError::NotConfirmed(format!(
                "broker nacked publish to {exchange} ({routing_key})"
            ))),
        }
    }

    /// Publish a JSON value and wait for the confirm.
    pub async fn publish_json<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
        properties: BasicProperties,
    ) -> Result<(), MqError> {
        let body = serde_json::to_vec(value)?;
        self.publish(exchange, routing_key, &body, properties).await
    }
}

/// Persistent JSON message properties.
pub fn json_properties() -> BasicProperties {
    BasicProperties::default()
        .with_content_type("application/json".into())
        .with_delivery_mode(2)
}

/// Gzip a payload (DLQ records are compressed on the wire).
pub fn gzip(body: &[u8]) -> Result<Vec<u8>, MqError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_gzip_roundtrip() {
        let body = br#"{"task_id":"t-1","failure_reason":"fatal_error"}"#;
        let compressed = gzip(body).unwrap();
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn test_json_properties_are_persistent() {
        let props = json_properties();
        assert_eq!(props.delivery_mode(), &Some(2));
        assert_eq!(
            props.content_type().as_ref().map(|c| c.as_str()),
            Some("application/json")
        );
    }
}
