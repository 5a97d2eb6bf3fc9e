use std::sync::Arc;

use jobs::{CancellationService, Dispatcher, DlqHandler, JobStore, ProgressService};
use sea_orm::DatabaseConnection;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub store: Arc<JobStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub cancel: Arc<CancellationService>,
    pub progress: Arc<ProgressService>,
    pub dlq: Arc<DlqHandler>,
    pub config: AppConfig,
}
