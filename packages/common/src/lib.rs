pub mod config;
pub mod dlq;
pub mod event;
pub mod job_status;
pub mod message;
pub mod queue;
pub mod retry;
pub mod taxonomy;
pub mod workload;

pub use config::{BrokerConfig, CacheConfig, DatabaseConfig};
pub use dlq::{DlqPayload, FailureReason, DLQ_VERSION};
pub use event::JobStatusChanged;
pub use job_status::JobStatus;
pub use message::JobMessage;
pub use retry::RetryPolicy;
pub use taxonomy::{ErrorKind, ErrorMetadata, WorkloadError};
pub use workload::{JobPriority, WorkloadClass};
