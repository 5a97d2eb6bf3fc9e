use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", job_routes())
        .nest("/dlq", dlq_routes())
}

fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::jobs::submit_job))
        .route("/{id}", get(handlers::jobs::get_job))
        .route("/{id}/cancel", post(handlers::jobs::cancel_job))
        .route("/{id}/progress", get(handlers::jobs::get_job_progress))
        .route("/{id}/audit", get(handlers::jobs::get_job_audit))
}

fn dlq_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::dlq::list_dlq_records))
        .route("/stats", get(handlers::dlq::get_dlq_stats))
        .route("/{id}", get(handlers::dlq::get_dlq_record))
        .route("/{id}/resolve", post(handlers::dlq::resolve_dlq_record))
        .route("/{id}/recover", post(handlers::dlq::recover_dlq_record))
}
