use std::time::Duration;

use lapin::{Connection, ConnectionProperties};
use tracing::{info, warn};

use crate::error::MqError;

/// Connect to the broker with bounded retry on startup.
///
/// Heartbeats are negotiated through the connection URL (the default config
/// carries `?heartbeat=30`).
pub async fn connect(url: &str, attempts: u32) -> Result<Connection, MqError> {
    let attempts = attempts.max(1);
    let mut delay = Duration::from_millis(200);

    for attempt in 1..=attempts {
        match Connection::connect(url, ConnectionProperties::default()).await {
            Ok(conn) => {
                info!(attempt, "Broker connection established");
                return Ok(conn);
            }
            Err(e) if attempt < attempts => {
                warn!(attempt, error = %e, "Broker connection failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(5));
            }
            Err(e) => {
                return Err(MqError::Connection(format!(
                    "giving up after {attempts} attempts: {e}"
                )));
            }
        }
    }

    unreachable!("connect loop always returns")
}
