use axum::{extract::Query, extract::State, Json};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use voxledger_asr::{ScheduleRequest, TaskFeatures};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ScoresQuery {
    pub user: Option<Uuid>,
    pub variant: String,
    #[serde(default)]
    pub diarization: bool,
    #[serde(default)]
    pub word_level: bool,
}

pub async fn scores(
    State(state): State<AppState>,
    Query(query): Query<ScoresQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let req = ScheduleRequest {
        user: query.user,
        variant: query.variant,
        preferred_providers: None,
        weights: None,
        task_features: TaskFeatures {
            diarization: query.diarization,
            word_level: query.word_level,
        },
    };
    let breakdowns = state.scheduler.scores(&req, OffsetDateTime::now_utc()).await?;
    Ok(Json(serde_json::json!({ "scores": breakdowns })))
}
