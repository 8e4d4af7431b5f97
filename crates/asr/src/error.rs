//! Error taxonomy for the ASR orchestration core

use thiserror::Error;

/// Errors raised by the pricing registry, period accountant, user-quota
/// limiter, scheduler, pre-check gate, and settlement.
#[derive(Debug, Error)]
pub enum AsrError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Missing required parameter: {0}")]
    MissingRequiredParameter(String),

    #[error("Unsupported source format: {0}")]
    UnsupportedSourceFormat(String),

    #[error("Invalid URL format: {0}")]
    InvalidUrlFormat(String),

    #[error("External video unavailable: {0}")]
    ExternalVideoUnavailable(String),

    #[error("External video probe failed: {0}")]
    ExternalVideoProbeFailed(String),

    #[error("Task already exists")]
    TaskAlreadyExists,

    #[error("Task already in progress")]
    TaskInProgress,

    #[error("Task is not retryable")]
    TaskNotRetryable,

    #[error("Task retry limit exceeded")]
    TaskRetryLimitExceeded,

    #[error("ASR provider not registered: {0}")]
    AsrProviderNotRegistered(String),

    #[error("ASR provider disabled: {0}")]
    AsrProviderDisabled(String),

    #[error("ASR quota exhausted for provider: {0}")]
    AsrQuotaExhaustedForProvider(String),

    #[error("All ASR providers exhausted")]
    AllAsrProvidersExhausted,

    #[error("ASR service failed: {0}")]
    AsrServiceFailed(String),

    #[error("Settlement idempotency violation for task {task_id} attempt {attempt}")]
    SettlementIdempotencyViolation { task_id: String, attempt: i32 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AsrError {
    fn from(err: sqlx::Error) -> Self {
        AsrError::Database(err.to_string())
    }
}

pub type AsrResult<T> = Result<T, AsrError>;
