//! Pre-check gate (component E)
//!
//! Validates a task-creation request, de-duplicates it against the
//! submitter's existing tasks, and verifies a provider will actually be
//! available to run it — all before a task row is persisted or a job
//! descriptor is emitted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{AsrError, AsrResult};
use crate::pricing::PricingRegistry;
use crate::scheduler::{ScheduleRequest, Scheduler, TaskFeatures};
use crate::task::TaskStatus;
use voxledger_shared::SourceType;

/// Per-call timeout for a single probe request.
const PROBE_CALL_TIMEOUT: Duration = Duration::from_secs(15);
/// Overall budget for resolving one video URL, across redirects/retries.
const PROBE_TOTAL_TIMEOUT: Duration = Duration::from_secs(20);

/// Metadata recovered from a successful probe. `title` backfills a task's
/// title when the caller didn't supply one.
#[derive(Debug, Clone, Default)]
pub struct ProbeMetadata {
    pub title: Option<String>,
}

/// Collaborator that confirms an externally hosted video actually exists
/// and is reachable. Implementations own their own per-call timeout;
/// `PreCheckGate` additionally enforces `PROBE_TOTAL_TIMEOUT` around the
/// whole call.
#[async_trait]
pub trait VideoProbe: Send + Sync {
    /// Resolve `video_id` on `host`, returning an error if the video is
    /// unavailable or the probe itself fails.
    async fn probe(&self, host: &str, video_id: &str) -> Result<ProbeMetadata, AsrError>;
}

/// A probe that always succeeds with no recovered metadata, for wiring
/// without live network access (tests, offline demos).
pub struct AlwaysAvailable;

#[async_trait]
impl VideoProbe for AlwaysAvailable {
    async fn probe(&self, _host: &str, _video_id: &str) -> Result<ProbeMetadata, AsrError> {
        Ok(ProbeMetadata::default())
    }
}

/// A probe that fetches the video's canonical page and scrapes its
/// `<title>` tag. A real deployment would call the platform's oEmbed/API
/// endpoint instead of scraping HTML; this is a demo implementation, not a
/// real video-site integration.
pub struct HttpVideoProbe {
    client: reqwest::Client,
}

impl HttpVideoProbe {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_CALL_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    fn canonical_url(host: &str, video_id: &str) -> Option<String> {
        match host {
            "youtube" => Some(format!("https://www.youtube.com/watch?v={video_id}")),
            "bilibili" => Some(format!("https://www.bilibili.com/video/{video_id}")),
            _ => None,
        }
    }

    fn extract_title(html: &str) -> Option<String> {
        let start = html.find("<title>")? + "<title>".len();
        let end = html[start..].find("</title>")? + start;
        let title = html[start..end].trim();
        if title.is_empty() {
            None
        } else {
            Some(title.to_string())
        }
    }
}

impl Default for HttpVideoProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoProbe for HttpVideoProbe {
    async fn probe(&self, host: &str, video_id: &str) -> Result<ProbeMetadata, AsrError> {
        let url = Self::canonical_url(host, video_id)
            .ok_or_else(|| AsrError::UnsupportedSourceFormat(host.to_string()))?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AsrError::ExternalVideoProbeFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AsrError::ExternalVideoProbeFailed(format!(
                "probe returned status {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AsrError::ExternalVideoProbeFailed(e.to_string()))?;

        Ok(ProbeMetadata {
            title: Self::extract_title(&body),
        })
    }
}

/// Options carried on a task-creation request that the pre-check gate
/// inspects (provider pinning and feature flags); everything else in the
/// request body is opaque to this crate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreCheckOptions {
    pub asr_provider: Option<String>,
    pub asr_variant: String,
    pub enable_speaker_diarization: bool,
    pub word_level: bool,
}

/// A task-creation request as it reaches the pre-check gate.
#[derive(Debug, Clone)]
pub struct PreCheckRequest {
    pub user_id: Uuid,
    pub is_admin: bool,
    pub source_type: SourceType,
    pub file_key: Option<String>,
    pub source_url: Option<String>,
    pub content_hash: Option<String>,
    pub options: PreCheckOptions,
}

/// Outcome of a passed pre-check: the fields needed to persist the task row
/// and emit the job descriptor.
#[derive(Debug, Clone)]
pub struct PreCheckResult {
    pub content_hash: String,
    pub selected_provider: Option<String>,
    pub probed_title: Option<String>,
}

/// Recognised external video hosts and how to pull a stable video id out of
/// their URL shape.
fn recognise_host(url: &url::Url) -> Option<(&'static str, String)> {
    let host = url.host_str()?;
    if host.ends_with("youtube.com") {
        let video_id = url
            .query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.into_owned())?;
        Some(("youtube", video_id))
    } else if host == "youtu.be" {
        let video_id = url.path().trim_start_matches('/').to_string();
        if video_id.is_empty() {
            None
        } else {
            Some(("youtube", video_id))
        }
    } else if host.ends_with("bilibili.com") || host == "b23.tv" {
        let video_id = url.path().trim_start_matches('/').to_string();
        if video_id.is_empty() {
            None
        } else {
            Some(("bilibili", video_id))
        }
    } else {
        None
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Validates the source descriptor and derives the content fingerprint.
/// Returns `(content_hash, host, video_id)`, where `host`/`video_id` are
/// `None` for uploads.
fn validate_source(req: &PreCheckRequest) -> AsrResult<(String, Option<(String, String)>)> {
    match req.source_type {
        SourceType::Upload => {
            if req.file_key.is_none() {
                return Err(AsrError::MissingRequiredParameter("file_key".to_string()));
            }
            let content_hash = req.content_hash.clone().ok_or_else(|| {
                AsrError::MissingRequiredParameter("content_hash".to_string())
            })?;
            Ok((content_hash, None))
        }
        SourceType::Youtube => {
            let raw_url = req
                .source_url
                .as_ref()
                .ok_or_else(|| AsrError::MissingRequiredParameter("source_url".to_string()))?;
            let parsed = url::Url::parse(raw_url)
                .map_err(|e| AsrError::InvalidUrlFormat(e.to_string()))?;
            let (host, video_id) = recognise_host(&parsed).ok_or_else(|| {
                AsrError::UnsupportedSourceFormat(format!(
                    "unrecognised video host: {}",
                    parsed.host_str().unwrap_or("")
                ))
            })?;
            let content_hash = sha256_hex(&format!("{host}:{video_id}"));
            Ok((content_hash, Some((host.to_string(), video_id))))
        }
    }
}

/// Pre-check gate: validation, de-duplication, and quota verification
/// before a task is persisted.
#[derive(Clone)]
pub struct PreCheckGate {
    pool: PgPool,
    scheduler: Scheduler,
    pricing: PricingRegistry,
    probe: Arc<dyn VideoProbe>,
}

impl PreCheckGate {
    pub fn new(
        pool: PgPool,
        scheduler: Scheduler,
        pricing: PricingRegistry,
        probe: Arc<dyn VideoProbe>,
    ) -> Self {
        Self {
            pool,
            scheduler,
            pricing,
            probe,
        }
    }

    /// Run every check in order; fail fast on the first violation. Does not
    /// persist anything — the caller inserts the task row only after this
    /// returns `Ok`.
    pub async fn check(&self, req: &PreCheckRequest) -> AsrResult<PreCheckResult> {
        let (content_hash, external) = validate_source(req)?;

        let mut probed_title = None;
        if let Some((host, video_id)) = &external {
            let metadata = tokio::time::timeout(PROBE_TOTAL_TIMEOUT, async {
                tokio::time::timeout(PROBE_CALL_TIMEOUT, self.probe.probe(host, video_id))
                    .await
                    .map_err(|_| {
                        AsrError::ExternalVideoProbeFailed("probe call timed out".to_string())
                    })?
            })
            .await
            .map_err(|_| {
                AsrError::ExternalVideoProbeFailed("probe budget exceeded".to_string())
            })??;
            probed_title = metadata.title;
        }

        self.check_duplicate(req.user_id, &content_hash).await?;

        let selected_provider = self.check_quota(req).await?;

        Ok(PreCheckResult {
            content_hash,
            selected_provider,
            probed_title,
        })
    }

    async fn check_duplicate(&self, user_id: Uuid, content_hash: &str) -> AsrResult<()> {
        let existing = sqlx::query_as::<_, (TaskStatus,)>(
            r#"
            SELECT status
            FROM tasks
            WHERE user_id = $1 AND content_hash = $2 AND deleted_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        match existing.map(|(status,)| status) {
            Some(status) if status.is_completed() => Err(AsrError::TaskAlreadyExists),
            Some(status) if status.is_processing() => Err(AsrError::TaskInProgress),
            // Failed (or no prior task): permitted, including as a retry.
            _ => Ok(()),
        }
    }

    async fn check_quota(&self, req: &PreCheckRequest) -> AsrResult<Option<String>> {
        if req.is_admin {
            return Ok(req.options.asr_provider.clone());
        }

        let now = OffsetDateTime::now_utc();
        let task_features = TaskFeatures {
            diarization: req.options.enable_speaker_diarization,
            word_level: req.options.word_level,
        };

        if let Some(provider) = &req.options.asr_provider {
            let pricing = self
                .pricing
                .get(provider, &req.options.asr_variant)
                .await?
                .ok_or_else(|| AsrError::AsrProviderNotRegistered(provider.clone()))?;
            if !pricing.is_enabled {
                return Err(AsrError::AsrProviderDisabled(provider.clone()));
            }

            let schedule_req = ScheduleRequest {
                user: Some(req.user_id),
                variant: req.options.asr_variant.clone(),
                preferred_providers: Some(vec![provider.clone()]),
                weights: None,
                task_features,
            };
            let scores = self.scheduler.scores(&schedule_req, now).await?;
            if scores.iter().any(|s| &s.provider == provider) {
                return Ok(Some(provider.clone()));
            }
            return Err(AsrError::AsrQuotaExhaustedForProvider(provider.clone()));
        }

        let schedule_req = ScheduleRequest {
            user: Some(req.user_id),
            variant: req.options.asr_variant.clone(),
            preferred_providers: None,
            weights: None,
            task_features,
        };
        match self.scheduler.select(&schedule_req, now).await? {
            Some(provider) => Ok(Some(provider)),
            None => Err(AsrError::AllAsrProvidersExhausted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload_req(file_key: Option<&str>, content_hash: Option<&str>) -> PreCheckRequest {
        PreCheckRequest {
            user_id: Uuid::new_v4(),
            is_admin: false,
            source_type: SourceType::Upload,
            file_key: file_key.map(str::to_string),
            source_url: None,
            content_hash: content_hash.map(str::to_string),
            options: PreCheckOptions::default(),
        }
    }

    #[test]
    fn upload_requires_file_key() {
        let req = upload_req(None, Some("abc"));
        assert!(matches!(
            validate_source(&req),
            Err(AsrError::MissingRequiredParameter(_))
        ));
    }

    #[test]
    fn upload_requires_content_hash() {
        let req = upload_req(Some("key"), None);
        assert!(matches!(
            validate_source(&req),
            Err(AsrError::MissingRequiredParameter(_))
        ));
    }

    #[test]
    fn upload_passes_through_content_hash() {
        let req = upload_req(Some("key"), Some("deadbeef"));
        let (hash, external) = validate_source(&req).unwrap();
        assert_eq!(hash, "deadbeef");
        assert!(external.is_none());
    }

    #[test]
    fn youtube_url_derives_sha256_fingerprint() {
        let req = PreCheckRequest {
            user_id: Uuid::new_v4(),
            is_admin: false,
            source_type: SourceType::Youtube,
            file_key: None,
            source_url: Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string()),
            content_hash: None,
            options: PreCheckOptions::default(),
        };
        let (hash, external) = validate_source(&req).unwrap();
        assert_eq!(hash, sha256_hex("youtube:dQw4w9WgXcQ"));
        assert_eq!(external, Some(("youtube".to_string(), "dQw4w9WgXcQ".to_string())));
    }

    #[test]
    fn bilibili_url_is_recognised() {
        let req = PreCheckRequest {
            user_id: Uuid::new_v4(),
            is_admin: false,
            source_type: SourceType::Youtube,
            file_key: None,
            source_url: Some("https://www.bilibili.com/BV1xx411c7mD".to_string()),
            content_hash: None,
            options: PreCheckOptions::default(),
        };
        let (_, external) = validate_source(&req).unwrap();
        assert_eq!(external.unwrap().0, "bilibili");
    }

    #[test]
    fn unrecognised_host_is_rejected() {
        let req = PreCheckRequest {
            user_id: Uuid::new_v4(),
            is_admin: false,
            source_type: SourceType::Youtube,
            file_key: None,
            source_url: Some("https://vimeo.com/12345".to_string()),
            content_hash: None,
            options: PreCheckOptions::default(),
        };
        assert!(matches!(
            validate_source(&req),
            Err(AsrError::UnsupportedSourceFormat(_))
        ));
    }

    #[test]
    fn malformed_url_is_rejected() {
        let req = PreCheckRequest {
            user_id: Uuid::new_v4(),
            is_admin: false,
            source_type: SourceType::Youtube,
            file_key: None,
            source_url: Some("not a url".to_string()),
            content_hash: None,
            options: PreCheckOptions::default(),
        };
        assert!(matches!(
            validate_source(&req),
            Err(AsrError::InvalidUrlFormat(_))
        ));
    }
}
