//! Generic error type for shared utilities (DB pooling, config loading)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoxLedgerError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for VoxLedgerError {
    fn from(err: sqlx::Error) -> Self {
        VoxLedgerError::Database(err.to_string())
    }
}
