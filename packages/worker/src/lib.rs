pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod harness;

pub use config::{WorkerAppConfig, WorkerConfig};
pub use context::JobContext;
pub use error::{Result, WorkerError};
pub use handlers::{HandlerRegistry, JobHandler};
