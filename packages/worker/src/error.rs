use thiserror::Error;

/// Worker harness error.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Configuration loading or parsing failure.
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Broker connection or operation failure.
    #[error("MQ error: {0}")]
    Mq(#[from] mq::MqError),

    /// Job state store failure.
    #[error("Store error: {0}")]
    Store(#[from] jobs::StoreError),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
