//! Usage ledger (append-only record of every settled attempt)
//!
//! One row per (task, attempt, provider); the unique constraint on that
//! triplet is what makes a duplicate settlement call a no-op rather than a
//! double charge.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AsrResult;
use voxledger_shared::LedgerStatus;

/// One settled attempt, successful or failed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageLedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_id: Option<Uuid>,
    pub attempt: i32,
    pub provider: String,
    pub variant: String,
    pub external_task_id: Option<String>,
    pub duration_seconds: f64,
    pub estimated_cost: f64,
    pub actual_cost: Option<f64>,
    pub status: LedgerStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub processing_time_ms: Option<i32>,
    pub free_quota_consumed: f64,
    pub paid_duration_seconds: f64,
    pub actual_paid_cost: f64,
    pub reconciled: bool,
    pub created_at: OffsetDateTime,
}

/// Fields needed to append a successful settlement row.
pub struct SuccessEntry<'a> {
    pub user_id: Uuid,
    pub task_id: Option<Uuid>,
    pub attempt: i32,
    pub provider: &'a str,
    pub variant: &'a str,
    pub external_task_id: Option<&'a str>,
    pub duration_seconds: f64,
    pub estimated_cost: f64,
    pub processing_time_ms: Option<i32>,
    pub free_quota_consumed: f64,
    pub paid_duration_seconds: f64,
    pub actual_paid_cost: f64,
}

/// Fields needed to append a failed settlement row (cost fields zeroed).
pub struct FailureEntry<'a> {
    pub user_id: Uuid,
    pub task_id: Option<Uuid>,
    pub attempt: i32,
    pub provider: &'a str,
    pub variant: &'a str,
    pub error_code: &'a str,
    pub error_message: &'a str,
    pub processing_time_ms: Option<i32>,
}

/// Insert a successful ledger row within an already-open transaction. A
/// conflict on `(task_id, attempt, provider)` means this attempt was already
/// settled; the insert is skipped and the existing row is returned so the
/// caller can detect the no-op.
pub(crate) async fn insert_success_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    entry: &SuccessEntry<'_>,
) -> AsrResult<(UsageLedgerEntry, bool)> {
    let inserted = sqlx::query_as::<_, UsageLedgerEntry>(
        r#"
        INSERT INTO usage_ledger
            (id, user_id, task_id, attempt, provider, variant, external_task_id,
             duration_seconds, estimated_cost, actual_cost, status,
             error_code, error_message, processing_time_ms,
             free_quota_consumed, paid_duration_seconds, actual_paid_cost,
             reconciled, created_at)
        VALUES
            (gen_random_uuid(), $1, $2, $3, $4, $5, $6,
             $7, $8, $8, 'success',
             NULL, NULL, $9,
             $10, $11, $12,
             false, now())
        ON CONFLICT (task_id, attempt, provider) DO NOTHING
        RETURNING id, user_id, task_id, attempt, provider, variant, external_task_id,
                  duration_seconds, estimated_cost, actual_cost, status,
                  error_code, error_message, processing_time_ms,
                  free_quota_consumed, paid_duration_seconds, actual_paid_cost,
                  reconciled, created_at
        "#,
    )
    .bind(entry.user_id)
    .bind(entry.task_id)
    .bind(entry.attempt)
    .bind(entry.provider)
    .bind(entry.variant)
    .bind(entry.external_task_id)
    .bind(entry.duration_seconds)
    .bind(entry.estimated_cost)
    .bind(entry.processing_time_ms)
    .bind(entry.free_quota_consumed)
    .bind(entry.paid_duration_seconds)
    .bind(entry.actual_paid_cost)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(row) = inserted {
        return Ok((row, true));
    }

    let existing = sqlx::query_as::<_, UsageLedgerEntry>(
        r#"
        SELECT id, user_id, task_id, attempt, provider, variant, external_task_id,
               duration_seconds, estimated_cost, actual_cost, status,
               error_code, error_message, processing_time_ms,
               free_quota_consumed, paid_duration_seconds, actual_paid_cost,
               reconciled, created_at
        FROM usage_ledger
        WHERE task_id = $1 AND attempt = $2 AND provider = $3
        "#,
    )
    .bind(entry.task_id)
    .bind(entry.attempt)
    .bind(entry.provider)
    .fetch_one(&mut **tx)
    .await?;

    Ok((existing, false))
}

/// Insert a failed ledger row within an already-open transaction. Cost and
/// settlement fields are zeroed since no quota or period was consumed.
pub(crate) async fn insert_failure_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    entry: &FailureEntry<'_>,
) -> AsrResult<(UsageLedgerEntry, bool)> {
    let inserted = sqlx::query_as::<_, UsageLedgerEntry>(
        r#"
        INSERT INTO usage_ledger
            (id, user_id, task_id, attempt, provider, variant, external_task_id,
             duration_seconds, estimated_cost, actual_cost, status,
             error_code, error_message, processing_time_ms,
             free_quota_consumed, paid_duration_seconds, actual_paid_cost,
             reconciled, created_at)
        VALUES
            (gen_random_uuid(), $1, $2, $3, $4, $5, NULL,
             0, 0, 0, 'failed',
             $6, $7, $8,
             0, 0, 0,
             false, now())
        ON CONFLICT (task_id, attempt, provider) DO NOTHING
        RETURNING id, user_id, task_id, attempt, provider, variant, external_task_id,
                  duration_seconds, estimated_cost, actual_cost, status,
                  error_code, error_message, processing_time_ms,
                  free_quota_consumed, paid_duration_seconds, actual_paid_cost,
                  reconciled, created_at
        "#,
    )
    .bind(entry.user_id)
    .bind(entry.task_id)
    .bind(entry.attempt)
    .bind(entry.provider)
    .bind(entry.variant)
    .bind(entry.error_code)
    .bind(entry.error_message)
    .bind(entry.processing_time_ms)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(row) = inserted {
        return Ok((row, true));
    }

    let existing = sqlx::query_as::<_, UsageLedgerEntry>(
        r#"
        SELECT id, user_id, task_id, attempt, provider, variant, external_task_id,
               duration_seconds, estimated_cost, actual_cost, status,
               error_code, error_message, processing_time_ms,
               free_quota_consumed, paid_duration_seconds, actual_paid_cost,
               reconciled, created_at
        FROM usage_ledger
        WHERE task_id = $1 AND attempt = $2 AND provider = $3
        "#,
    )
    .bind(entry.task_id)
    .bind(entry.attempt)
    .bind(entry.provider)
    .fetch_one(&mut **tx)
    .await?;

    Ok((existing, false))
}
