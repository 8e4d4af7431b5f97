//! VoxLedger API
//!
//! HTTP transport for the ASR orchestration core: task creation, settlement
//! callbacks, and admin endpoints for pricing and quota management.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
