//! Task model (created by the pre-check gate, owned by the worker runtime)

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use voxledger_shared::SourceType;

/// Task status lifecycle. Owned by the worker runtime; the core only reads
/// it for de-duplication and writes it at creation (`Queued`) and on
/// idempotent retry bumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Statuses that represent work still in flight (non-terminal, not yet
    /// failed) — a duplicate submission against one of these is rejected as
    /// "in progress" rather than "already exists" or permitted as a retry.
    pub fn is_processing(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Processing)
    }

    pub fn is_completed(self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    pub fn is_failed(self) -> bool {
        matches!(self, TaskStatus::Failed)
    }
}

/// Feature flags and provider pinning carried in a task's `options` blob.
/// Everything else in `options` (language, summary style, llm provider/model)
/// is an opaque collaborator concern the core never inspects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOptions {
    pub asr_provider: Option<String>,
    pub asr_variant: Option<String>,
    pub enable_speaker_diarization: bool,
    pub word_level: bool,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// A transcription task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: Option<String>,
    pub source_type: SourceType,
    pub file_key: Option<String>,
    pub source_url: Option<String>,
    pub content_hash: String,
    pub options: serde_json::Value,
    pub status: TaskStatus,
    pub stage: String,
    pub progress: i32,
    pub retry_count: i32,
    pub error_code: Option<String>,
    pub created_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

impl Task {
    pub fn options(&self) -> TaskOptions {
        serde_json::from_value(self.options.clone()).unwrap_or_default()
    }
}
