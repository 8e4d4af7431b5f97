//! Settlement (component F)
//!
//! Converts a measured transcription attempt into a charge: one transaction
//! spanning the period consumption (B), the user-quota update (C), and the
//! ledger insert, so a crash between them can neither double-charge nor
//! drop a charge.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{AsrError, AsrResult};
use crate::ledger::{insert_failure_in_tx, insert_success_in_tx, FailureEntry, SuccessEntry};
use crate::period::{consume_quota_in_tx, ConsumptionResult};
use crate::pricing::PricingRegistry;
use crate::quota::{record_usage_in_tx, UserQuotaLimiter};

/// Caller-supplied facts about a completed (or failed) transcription attempt.
pub struct SettleSuccess<'a> {
    pub user_id: Uuid,
    pub task_id: Option<Uuid>,
    pub attempt: i32,
    pub provider: &'a str,
    pub variant: &'a str,
    pub measured_duration: f64,
    pub external_task_id: Option<&'a str>,
    pub processing_time_ms: Option<i32>,
}

pub struct SettleFailure<'a> {
    pub user_id: Uuid,
    pub task_id: Option<Uuid>,
    pub attempt: i32,
    pub provider: &'a str,
    pub variant: &'a str,
    pub error_code: &'a str,
    pub error_message: &'a str,
    pub processing_time_ms: Option<i32>,
}

/// Outcome of a settlement call: the consumption split that was applied
/// (or would have been applied, had this not been a duplicate) and whether
/// this call actually inserted a new ledger row.
#[derive(Debug, Clone, Copy)]
pub struct SettlementOutcome {
    pub consumption: ConsumptionResult,
    pub newly_charged: bool,
}

/// Atomically charges an attempt and records it.
#[derive(Clone)]
pub struct Settlement {
    pool: PgPool,
    pricing: PricingRegistry,
    quota: UserQuotaLimiter,
}

impl Settlement {
    pub fn new(pool: PgPool, pricing: PricingRegistry, quota: UserQuotaLimiter) -> Self {
        Self { pool, pricing, quota }
    }

    /// Settle a successful attempt: consume the platform free tier, record
    /// user-quota usage, and append a ledger row, all inside one
    /// transaction. A second call with the same `(task_id, attempt,
    /// provider)` observes the first call's consumption result without
    /// charging again.
    pub async fn settle_success(&self, req: SettleSuccess<'_>) -> AsrResult<SettlementOutcome> {
        let pricing = self
            .pricing
            .get(req.provider, req.variant)
            .await?
            .ok_or_else(|| {
                AsrError::AsrProviderNotRegistered(format!("{}/{}", req.provider, req.variant))
            })?;

        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        let consumption = consume_quota_in_tx(
            &mut tx,
            req.provider,
            req.variant,
            req.measured_duration,
            None,
            &pricing,
            now,
        )
        .await?;

        let effective = self
            .quota
            .effective_rows(req.provider, req.variant, req.user_id, now)
            .await?;
        if !effective.is_empty() {
            record_usage_in_tx(
                &mut tx,
                req.provider,
                req.variant,
                req.measured_duration,
                &effective,
            )
            .await?;
        }

        let estimated_cost = req.measured_duration / 3600.0 * pricing.cost_per_hour;
        let entry = SuccessEntry {
            user_id: req.user_id,
            task_id: req.task_id,
            attempt: req.attempt,
            provider: req.provider,
            variant: req.variant,
            external_task_id: req.external_task_id,
            duration_seconds: req.measured_duration,
            estimated_cost,
            processing_time_ms: req.processing_time_ms,
            free_quota_consumed: consumption.free,
            paid_duration_seconds: consumption.paid,
            actual_paid_cost: consumption.cost,
        };
        let (_row, inserted) = insert_success_in_tx(&mut tx, &entry).await?;

        if !inserted {
            // Another call already settled this attempt; roll back this
            // call's would-be charge so it is never applied twice.
            tx.rollback().await?;
            return Ok(SettlementOutcome {
                consumption,
                newly_charged: false,
            });
        }

        tx.commit().await?;
        Ok(SettlementOutcome {
            consumption,
            newly_charged: true,
        })
    }

    /// Settle a failed attempt: no quota or period is consumed, and the
    /// ledger row carries zeroed cost fields and the reported error.
    pub async fn settle_failure(&self, req: SettleFailure<'_>) -> AsrResult<bool> {
        let mut tx = self.pool.begin().await?;
        let entry = FailureEntry {
            user_id: req.user_id,
            task_id: req.task_id,
            attempt: req.attempt,
            provider: req.provider,
            variant: req.variant,
            error_code: req.error_code,
            error_message: req.error_message,
            processing_time_ms: req.processing_time_ms,
        };
        let (_row, inserted) = insert_failure_in_tx(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok(inserted)
    }
}
