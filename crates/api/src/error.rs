//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use voxledger_asr::AsrError;

/// Application error type: every `AsrError` taxonomy member plus the
/// transport-layer concerns the core doesn't know about (auth, malformed
/// bodies).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Asr(#[from] AsrError),

    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Resource not found")]
    NotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),

            ApiError::Asr(err) => asr_error_response(err),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

fn asr_error_response(err: &AsrError) -> (StatusCode, &'static str, String) {
    match err {
        AsrError::InvalidParameter(_) => (StatusCode::BAD_REQUEST, "INVALID_PARAMETER", err.to_string()),
        AsrError::MissingRequiredParameter(_) => (
            StatusCode::BAD_REQUEST,
            "MISSING_REQUIRED_PARAMETER",
            err.to_string(),
        ),
        AsrError::UnsupportedSourceFormat(_) => (
            StatusCode::BAD_REQUEST,
            "UNSUPPORTED_SOURCE_FORMAT",
            err.to_string(),
        ),
        AsrError::InvalidUrlFormat(_) => {
            (StatusCode::BAD_REQUEST, "INVALID_URL_FORMAT", err.to_string())
        }
        AsrError::ExternalVideoUnavailable(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "EXTERNAL_VIDEO_UNAVAILABLE",
            err.to_string(),
        ),
        AsrError::ExternalVideoProbeFailed(_) => (
            StatusCode::BAD_GATEWAY,
            "EXTERNAL_VIDEO_PROBE_FAILED",
            err.to_string(),
        ),
        AsrError::TaskAlreadyExists => {
            (StatusCode::CONFLICT, "TASK_ALREADY_EXISTS", err.to_string())
        }
        AsrError::TaskInProgress => (StatusCode::CONFLICT, "TASK_IN_PROGRESS", err.to_string()),
        AsrError::TaskNotRetryable => {
            (StatusCode::CONFLICT, "TASK_NOT_RETRYABLE", err.to_string())
        }
        AsrError::TaskRetryLimitExceeded => (
            StatusCode::CONFLICT,
            "TASK_RETRY_LIMIT_EXCEEDED",
            err.to_string(),
        ),
        AsrError::AsrProviderNotRegistered(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "ASR_PROVIDER_NOT_REGISTERED",
            err.to_string(),
        ),
        AsrError::AsrProviderDisabled(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "ASR_PROVIDER_DISABLED",
            err.to_string(),
        ),
        AsrError::AsrQuotaExhaustedForProvider(_) => (
            StatusCode::PAYMENT_REQUIRED,
            "ASR_QUOTA_EXHAUSTED_FOR_PROVIDER",
            err.to_string(),
        ),
        AsrError::AllAsrProvidersExhausted => (
            StatusCode::PAYMENT_REQUIRED,
            "ALL_ASR_PROVIDERS_EXHAUSTED",
            err.to_string(),
        ),
        AsrError::AsrServiceFailed(_) => (
            StatusCode::BAD_GATEWAY,
            "ASR_SERVICE_FAILED",
            err.to_string(),
        ),
        AsrError::SettlementIdempotencyViolation { .. } => (
            StatusCode::CONFLICT,
            "SETTLEMENT_IDEMPOTENCY_VIOLATION",
            err.to_string(),
        ),
        AsrError::Database(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "DATABASE_ERROR",
            "Database error".to_string(),
        ),
        AsrError::Internal(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "Internal server error".to_string(),
        ),
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    if code == "23505" {
                        return ApiError::Asr(AsrError::Internal(
                            "conflicting concurrent write".to_string(),
                        ));
                    }
                }
                ApiError::Asr(AsrError::Database(db_err.to_string()))
            }
            _ => ApiError::Asr(AsrError::Database(err.to_string())),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
