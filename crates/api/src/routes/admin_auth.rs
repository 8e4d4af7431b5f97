//! Admin-route gate: a single shared bearer token. The core intentionally
//! has no user/session model; administrative writes (pricing, quotas) sit
//! behind one operator secret rather than a full auth stack.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;
    if token != state.config.admin_api_key {
        return Err(ApiError::Forbidden);
    }

    Ok(next.run(request).await)
}
