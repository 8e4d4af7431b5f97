use axum::{extract::State, Json};
use serde::Deserialize;

use voxledger_asr::PricingConfig;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list_pricing(State(state): State<AppState>) -> ApiResult<Json<Vec<PricingConfig>>> {
    let rows = state.pricing.list_enabled().await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct UpsertPricingBody {
    pub provider: String,
    pub variant: String,
    pub cost_per_hour: f64,
    pub free_quota_seconds: f64,
    pub reset_period: voxledger_shared::ResetPeriod,
    pub is_enabled: bool,
    pub quality_score: f64,
    pub supports_diarization: bool,
    pub supports_word_level: bool,
}

pub async fn upsert_pricing(
    State(state): State<AppState>,
    Json(body): Json<UpsertPricingBody>,
) -> ApiResult<Json<PricingConfig>> {
    let req = voxledger_asr::pricing::UpsertPricingRequest {
        cost_per_hour: body.cost_per_hour,
        free_quota_seconds: body.free_quota_seconds,
        reset_period: body.reset_period,
        is_enabled: body.is_enabled,
        quality_score: body.quality_score,
        supports_diarization: body.supports_diarization,
        supports_word_level: body.supports_word_level,
    };
    let row = state.pricing.upsert(&body.provider, &body.variant, req).await?;
    Ok(Json(row))
}
