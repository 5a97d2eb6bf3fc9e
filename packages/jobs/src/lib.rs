pub mod cache;
pub mod cancel;
pub mod database;
pub mod dispatch;
pub mod dlq;
pub mod entity;
pub mod events;
pub mod progress;
pub mod store;

pub use cache::Cache;
pub use cancel::CancellationService;
pub use dispatch::{DispatchError, Dispatcher};
pub use dlq::{Disposition, DlqHandler, DlqService, FailureContext, dlq_service};
pub use events::EventPublisher;
pub use progress::{ProgressService, ReportOutcome};
pub use store::{JobStore, StatusPatch, StoreError};
