use axum::{
    Json,
    extract::{Path, Query, State},
};
use common::WorkloadClass;
use common::dlq::DlqPayload;
use jobs::dlq::{ResolveResult, dlq_service};
use tracing::{info, instrument, warn};

use crate::error::{AppError, ErrorBody};
use crate::models::dlq::*;
use crate::models::shared::Pagination;
use crate::state::AppState;

/// List dead-lettered jobs.
#[utoipa::path(
    get,
    path = "",
    tag = "Dead Letter Queue",
    operation_id = "listDlqRecords",
    summary = "List dead-lettered jobs",
    params(ListDlqParams),
    responses(
        (status = 200, description = "Paginated DLQ records", body = DlqListResponse),
        (status = 400, description = "Invalid queue filter (VALIDATION_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn list_dlq_records(
    State(state): State<AppState>,
    Query(params): Query<ListDlqParams>,
) -> Result<Json<DlqListResponse>, AppError> {
    let queue = params
        .queue
        .map(|q| q.parse::<WorkloadClass>())
        .transpose()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(20).clamp(1, 100);

    let dlq = dlq_service(&state.db);
    let (records, total) = dlq.list(queue, params.resolved, page, per_page).await?;

    let data: Vec<DlqRecordResponse> = records.into_iter().map(Into::into).collect();
    let total_pages = total.div_ceil(per_page);

    Ok(Json(DlqListResponse {
        data,
        pagination: Pagination {
            page,
            per_page,
            total,
            total_pages,
        },
    }))
}

/// Get DLQ statistics.
#[utoipa::path(
    get,
    path = "/stats",
    tag = "Dead Letter Queue",
    operation_id = "getDlqStats",
    summary = "Get DLQ statistics",
    responses(
        (status = 200, description = "DLQ statistics", body = DlqStatsResponse),
    ),
)]
#[instrument(skip(state))]
pub async fn get_dlq_stats(
    State(state): State<AppState>,
) -> Result<Json<DlqStatsResponse>, AppError> {
    let dlq = dlq_service(&state.db);
    let stats = dlq.stats().await?;
    Ok(Json(stats.into()))
}

/// Get one DLQ record with its full payload.
#[utoipa::path(
    get,
    path = "/{id}",
    tag = "Dead Letter Queue",
    operation_id = "getDlqRecord",
    summary = "Get DLQ record details",
    params(("id" = i32, Path, description = "DLQ record ID")),
    responses(
        (status = 200, description = "DLQ record details", body = DlqRecordDetailResponse),
        (status = 404, description = "Record not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state), fields(id))]
pub async fn get_dlq_record(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<DlqRecordDetailResponse>, AppError> {
    let dlq = dlq_service(&state.db);
    let record = dlq
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("DLQ record {id} not found")))?;

    Ok(Json(record.into()))
}

/// Mark a DLQ record as resolved without recovery.
#[utoipa::path(
    post,
    path = "/{id}/resolve",
    tag = "Dead Letter Queue",
    operation_id = "resolveDlqRecord",
    summary = "Resolve a DLQ record",
    params(("id" = i32, Path, description = "DLQ record ID")),
    responses(
        (status = 200, description = "Record resolved", body = DlqResolveResponse),
        (status = 404, description = "Record not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state), fields(id))]
pub async fn resolve_dlq_record(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<DlqResolveResponse>, AppError> {
    let dlq = dlq_service(&state.db);
    match dlq.resolve(id).await? {
        ResolveResult::Resolved => Ok(Json(DlqResolveResponse {
            resolved: true,
            already_resolved: false,
        })),
        ResolveResult::AlreadyResolved => Ok(Json(DlqResolveResponse {
            resolved: true,
            already_resolved: true,
        })),
        ResolveResult::NotFound => Err(AppError::NotFound(format!("DLQ record {id} not found"))),
    }
}

/// Re-submit a dead-lettered job as a new job.
#[utoipa::path(
    post,
    path = "/{id}/recover",
    tag = "Dead Letter Queue",
    operation_id = "recoverDlqRecord",
    summary = "Recover a DLQ record",
    description = "Re-submits the recorded payload as a brand-new job with a reset attempt \
                   counter and marks the record resolved. The original failed job is untouched.",
    params(("id" = i32, Path, description = "DLQ record ID"), DlqRecoverParams),
    responses(
        (status = 200, description = "New job submitted", body = DlqRecoverResponse),
        (status = 400, description = "Record not recoverable (VALIDATION_ERROR)", body = ErrorBody),
        (status = 404, description = "Record not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, params), fields(id))]
pub async fn recover_dlq_record(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Query(params): Query<DlqRecoverParams>,
) -> Result<Json<DlqRecoverResponse>, AppError> {
    let queue = params
        .queue
        .map(|q| q.parse::<WorkloadClass>())
        .transpose()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let dlq = dlq_service(&state.db);
    let record = dlq
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("DLQ record {id} not found")))?;

    let payload: DlqPayload = serde_json::from_value(record.payload.clone())
        .map_err(|e| AppError::Validation(format!("Stored DLQ payload is unreadable: {e}")))?;

    let new_job_id = state
        .dlq
        .recover(&payload, &state.dispatcher, queue)
        .await?;

    let resolved = match dlq.resolve(id).await? {
        ResolveResult::Resolved | ResolveResult::AlreadyResolved => true,
        ResolveResult::NotFound => {
            warn!(id, "DLQ record vanished while recovering");
            false
        }
    };

    info!(id, %new_job_id, "DLQ record recovered");

    Ok(Json(DlqRecoverResponse {
        new_job_id,
        resolved,
    }))
}
