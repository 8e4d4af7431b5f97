use axum::{extract::State, Json};

use voxledger_asr::quota::UpsertQuotaRequest;
use voxledger_asr::UserQuota;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn upsert_quota(
    State(state): State<AppState>,
    Json(req): Json<UpsertQuotaRequest>,
) -> ApiResult<Json<UserQuota>> {
    let row = state.quota.upsert_quota(req).await?;
    Ok(Json(row))
}
