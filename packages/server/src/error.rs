use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use jobs::dlq::RecoverError;
use jobs::{DispatchError, StoreError};
use sea_orm::DbErr;
use serde::Serialize;

/// Structured error response body.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    RateLimited { retry_after: u64 },
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: msg,
                },
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message: msg,
                },
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    code: "CONFLICT",
                    message: msg,
                },
            ),
            AppError::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorBody {
                    code: "RATE_LIMITED",
                    message: format!("Submission rate exceeded, retry after {retry_after}s"),
                },
            ),
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retry_after = match &self {
            AppError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        };
        let (status, body) = self.status_and_body();
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AppError::NotFound(format!("Job {id} not found")),
            StoreError::IllegalTransition { .. }
            | StoreError::ProgressDecrease { .. }
            | StoreError::Terminal(_) => AppError::Conflict(err.to_string()),
            StoreError::Db(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::PayloadTooLarge { .. } => AppError::Validation(err.to_string()),
            DispatchError::Store(e) => e.into(),
            DispatchError::Transport(e) => AppError::Internal(e.to_string()),
            DispatchError::Serialization(e) => AppError::Validation(e.to_string()),
        }
    }
}

impl From<RecoverError> for AppError {
    fn from(err: RecoverError) -> Self {
        match err {
            RecoverError::UnknownQueue(_)
            | RecoverError::MissingInput
            | RecoverError::MissingTenant => AppError::Validation(err.to_string()),
            RecoverError::Dispatch(e) => e.into(),
        }
    }
}
