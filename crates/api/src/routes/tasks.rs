use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use voxledger_asr::precheck::{PreCheckOptions, PreCheckRequest};
use voxledger_asr::settlement::{SettleFailure, SettleSuccess};
use voxledger_shared::SourceType;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn require_user(headers: &HeaderMap) -> ApiResult<Uuid> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    Uuid::parse_str(raw).map_err(|_| ApiError::Unauthorized)
}

fn is_admin(headers: &HeaderMap, state: &AppState) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == state.config.admin_api_key)
}

#[derive(Debug, Deserialize)]
pub struct TaskCreateOptions {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub enable_speaker_diarization: bool,
    #[serde(default)]
    pub word_level: bool,
    #[serde(default)]
    pub summary_style: Option<String>,
    #[serde(default)]
    pub asr_provider: Option<String>,
    #[serde(default = "default_variant")]
    pub asr_variant: String,
    #[serde(default)]
    pub llm_provider: Option<String>,
    #[serde(default)]
    pub llm_model_id: Option<String>,
}

fn default_variant() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: Option<String>,
    pub source_type: SourceType,
    pub file_key: Option<String>,
    pub source_url: Option<String>,
    pub content_hash: Option<String>,
    pub options: TaskCreateOptions,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub task_id: Uuid,
    pub status: &'static str,
    pub stage: &'static str,
    pub progress: i32,
    pub selected_provider: Option<String>,
}

pub async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateTaskRequest>,
) -> ApiResult<Json<CreateTaskResponse>> {
    let user_id = require_user(&headers)?;
    let admin = is_admin(&headers, &state);

    let precheck_req = PreCheckRequest {
        user_id,
        is_admin: admin,
        source_type: body.source_type,
        file_key: body.file_key.clone(),
        source_url: body.source_url.clone(),
        content_hash: body.content_hash.clone(),
        options: PreCheckOptions {
            asr_provider: body.options.asr_provider.clone(),
            asr_variant: body.options.asr_variant.clone(),
            enable_speaker_diarization: body.options.enable_speaker_diarization,
            word_level: body.options.word_level,
        },
    };

    let outcome = state.precheck.check(&precheck_req).await?;

    let title = body
        .title
        .or_else(|| outcome.probed_title.clone())
        .or_else(|| match body.source_type {
            SourceType::Youtube => body.source_url.clone(),
            SourceType::Upload => body.file_key.clone(),
        });

    // The provider the worker executes against is whatever pre-check
    // resolved (a verified pin or the scheduler's pick), not the caller's
    // raw request — an admin task created with no pin at all persists
    // `None` here, and the worker consults the scheduler itself at run time.
    let options_json = serde_json::json!({
        "asr_provider": outcome.selected_provider,
        "asr_variant": body.options.asr_variant,
        "enable_speaker_diarization": body.options.enable_speaker_diarization,
        "word_level": body.options.word_level,
        "language": body.options.language,
        "summary_style": body.options.summary_style,
        "llm_provider": body.options.llm_provider,
        "llm_model_id": body.options.llm_model_id,
    });

    let task_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO tasks
            (user_id, title, source_type, file_key, source_url, content_hash, options,
             status, stage, progress, retry_count)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'queued', 'queued', 1, 0)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(&title)
    .bind(body.source_type)
    .bind(&body.file_key)
    .bind(&body.source_url)
    .bind(&outcome.content_hash)
    .bind(&options_json)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(
        task_id = %task_id,
        provider = ?outcome.selected_provider,
        "job descriptor emitted"
    );

    Ok(Json(CreateTaskResponse {
        task_id,
        status: "queued",
        stage: "queued",
        progress: 1,
        selected_provider: outcome.selected_provider,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SettleRequest {
    pub provider: String,
    pub variant: String,
    pub attempt: i32,
    #[serde(default)]
    pub external_task_id: Option<String>,
    #[serde(default)]
    pub processing_time_ms: Option<i32>,
    pub outcome: SettleOutcomeBody,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SettleOutcomeBody {
    Success { measured_duration: f64 },
    Failed { error_code: String, error_message: String },
}

#[derive(Debug, Serialize)]
pub struct SettleResponse {
    pub newly_charged: bool,
}

pub async fn settle_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<Uuid>,
    Json(body): Json<SettleRequest>,
) -> ApiResult<Json<SettleResponse>> {
    let user_id = require_user(&headers)?;

    let newly_charged = match body.outcome {
        SettleOutcomeBody::Success { measured_duration } => {
            let result = state
                .settlement
                .settle_success(SettleSuccess {
                    user_id,
                    task_id: Some(task_id),
                    attempt: body.attempt,
                    provider: &body.provider,
                    variant: &body.variant,
                    measured_duration,
                    external_task_id: body.external_task_id.as_deref(),
                    processing_time_ms: body.processing_time_ms,
                })
                .await?;
            result.newly_charged
        }
        SettleOutcomeBody::Failed {
            error_code,
            error_message,
        } => {
            state
                .settlement
                .settle_failure(SettleFailure {
                    user_id,
                    task_id: Some(task_id),
                    attempt: body.attempt,
                    provider: &body.provider,
                    variant: &body.variant,
                    error_code: &error_code,
                    error_message: &error_message,
                    processing_time_ms: body.processing_time_ms,
                })
                .await?
        }
    };

    Ok(Json(SettleResponse { newly_charged }))
}
