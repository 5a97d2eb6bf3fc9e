use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("publish not confirmed by broker: {0}")]
    NotConfirmed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] lapin::Error),
}
