use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{AppError, ErrorBody};
use crate::models::jobs::*;
use crate::ratelimit::check_rate_limit;
use crate::state::AppState;

/// Submit a job.
#[utoipa::path(
    post,
    path = "",
    tag = "Jobs",
    operation_id = "submitJob",
    summary = "Submit a job",
    description = "Routes the job to the bounded priority queue of its workload class. \
                   The returned id can be polled immediately.",
    request_body = SubmitJobRequest,
    responses(
        (status = 202, description = "Job accepted", body = SubmitJobResponse),
        (status = 400, description = "Unknown class or oversized input (VALIDATION_ERROR)", body = ErrorBody),
        (status = 429, description = "Submission rate exceeded (RATE_LIMITED)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, req))]
pub async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), AppError> {
    check_rate_limit(
        &state.db,
        &req.tenant_id,
        state.config.server.submission_rate_per_minute,
    )
    .await?;

    let job_id = state
        .dispatcher
        .submit(req.tenant_id, req.class, req.input, req.priority)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse { job_id })))
}

/// Get a job record.
#[utoipa::path(
    get,
    path = "/{id}",
    tag = "Jobs",
    operation_id = "getJob",
    summary = "Get a job record",
    params(("id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job record", body = JobResponse),
        (status = 404, description = "Job not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state), fields(id))]
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>, AppError> {
    let job = state.store.get(id).await?;
    Ok(Json(job.into()))
}

/// Request cooperative cancellation.
#[utoipa::path(
    post,
    path = "/{id}/cancel",
    tag = "Jobs",
    operation_id = "cancelJob",
    summary = "Request job cancellation",
    description = "Idempotent. A running worker observes the request at its next \
                   cancellation checkpoint; a job not yet picked up is cancelled at pickup.",
    params(("id" = Uuid, Path, description = "Job ID"), CancelJobParams),
    responses(
        (status = 200, description = "Cancellation requested", body = CancelJobResponse),
        (status = 404, description = "Job not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, params), fields(id))]
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<CancelJobParams>,
) -> Result<Json<CancelJobResponse>, AppError> {
    let outcome = state.cancel.request(id, params.reason).await?;

    Ok(Json(CancelJobResponse {
        cancel_requested: true,
        status: outcome.job.status,
    }))
}

/// Get job progress.
#[utoipa::path(
    get,
    path = "/{id}/progress",
    tag = "Jobs",
    operation_id = "getJobProgress",
    summary = "Get job progress",
    params(("id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Progress snapshot", body = ProgressResponse),
        (status = 404, description = "Job not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state), fields(id))]
pub async fn get_job_progress(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProgressResponse>, AppError> {
    let info = state.progress.get_progress(id).await?;
    Ok(Json(info.into()))
}

/// Get the audit trail of a job.
#[utoipa::path(
    get,
    path = "/{id}/audit",
    tag = "Jobs",
    operation_id = "getJobAudit",
    summary = "Get the audit trail of a job",
    params(("id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Audit entries, oldest first", body = AuditTrailResponse),
        (status = 404, description = "Job not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state), fields(id))]
pub async fn get_job_audit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AuditTrailResponse>, AppError> {
    let entries = state.store.list_audit(id).await?;
    Ok(Json(AuditTrailResponse {
        job_id: id,
        entries: entries.into_iter().map(Into::into).collect(),
    }))
}
