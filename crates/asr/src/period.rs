//! Period accountant (component B)
//!
//! Tracks period-bucketed platform free-tier consumption per (owner?,
//! provider, variant, period_type, period_start), with automatic rollover
//! derived from the pricing config's `reset_period`.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::{Date, Month, OffsetDateTime, Time};
use uuid::Uuid;

use crate::error::AsrResult;
use crate::pricing::PricingConfig;
use voxledger_shared::PeriodType;

/// A lazily-created counter row for one (owner?, provider, variant, period).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsagePeriod {
    pub owner_user_id: Option<Uuid>,
    pub provider: String,
    pub variant: String,
    pub period_type: PeriodType,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
    pub used_seconds: f64,
    pub free_quota_used: f64,
    pub paid_seconds: f64,
    pub total_cost: f64,
}

/// Result of consuming `duration` seconds against a period.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConsumptionResult {
    pub free: f64,
    pub paid: f64,
    pub cost: f64,
    pub remaining_free: f64,
}

/// Fixed sentinel window used for providers with `reset_period = none`.
fn sentinel_bounds() -> (OffsetDateTime, OffsetDateTime) {
    let start = Date::from_calendar_date(1970, Month::January, 1)
        .expect("valid date")
        .with_time(Time::MIDNIGHT)
        .assume_utc();
    let end = Date::from_calendar_date(2099, Month::December, 31)
        .expect("valid date")
        .with_hms_micro(23, 59, 59, 999_999)
        .expect("valid time")
        .assume_utc();
    (start, end)
}

/// Derive the current `(period_type, period_start, period_end)` for a
/// pricing config's `reset_period`, anchored at `now`.
pub fn current_period_bounds(
    reset_period: voxledger_shared::ResetPeriod,
    now: OffsetDateTime,
) -> (PeriodType, OffsetDateTime, OffsetDateTime) {
    use voxledger_shared::ResetPeriod;
    match reset_period {
        ResetPeriod::Monthly => {
            let start_date = Date::from_calendar_date(now.year(), now.month(), 1)
                .expect("valid date");
            let start = start_date.with_time(Time::MIDNIGHT).assume_utc();
            let (next_year, next_month) = if now.month() == Month::December {
                (now.year() + 1, Month::January)
            } else {
                (now.year(), now.month().next())
            };
            let end = Date::from_calendar_date(next_year, next_month, 1)
                .expect("valid date")
                .with_time(Time::MIDNIGHT)
                .assume_utc();
            (PeriodType::Month, start, end)
        }
        ResetPeriod::Yearly => {
            let start = Date::from_calendar_date(now.year(), Month::January, 1)
                .expect("valid date")
                .with_time(Time::MIDNIGHT)
                .assume_utc();
            let end = Date::from_calendar_date(now.year() + 1, Month::January, 1)
                .expect("valid date")
                .with_time(Time::MIDNIGHT)
                .assume_utc();
            (PeriodType::Year, start, end)
        }
        ResetPeriod::None => {
            let (start, end) = sentinel_bounds();
            (PeriodType::Total, start, end)
        }
    }
}

/// Accountant for platform free-tier period counters.
#[derive(Clone)]
pub struct PeriodAccountant {
    pool: PgPool,
}

impl PeriodAccountant {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch (or lazily create) the period row for `now`, without taking a
    /// row lock. Insertion races are resolved by converting a unique-key
    /// conflict into a fetch of the winning row.
    pub async fn get_or_create_period(
        &self,
        provider: &str,
        variant: &str,
        owner_user_id: Option<Uuid>,
        pricing: &PricingConfig,
        now: OffsetDateTime,
    ) -> AsrResult<UsagePeriod> {
        let (period_type, period_start, period_end) =
            current_period_bounds(pricing.reset_period, now);

        if let Some(row) = self
            .fetch_period(provider, variant, owner_user_id, period_type, period_start)
            .await?
        {
            return Ok(row);
        }

        let inserted = sqlx::query_as::<_, UsagePeriod>(
            r#"
            INSERT INTO usage_periods
                (owner_user_id, provider, variant, period_type, period_start, period_end,
                 used_seconds, free_quota_used, paid_seconds, total_cost)
            VALUES ($1, $2, $3, $4, $5, $6, 0, 0, 0, 0)
            ON CONFLICT (owner_user_id, provider, variant, period_type, period_start)
            DO NOTHING
            RETURNING owner_user_id, provider, variant, period_type, period_start, period_end,
                      used_seconds, free_quota_used, paid_seconds, total_cost
            "#,
        )
        .bind(owner_user_id)
        .bind(provider)
        .bind(variant)
        .bind(period_type)
        .bind(period_start)
        .bind(period_end)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(row);
        }

        // Another request won the race; fetch its row.
        self.fetch_period(provider, variant, owner_user_id, period_type, period_start)
            .await?
            .ok_or_else(|| {
                crate::error::AsrError::Internal(
                    "period row vanished after conflicting insert".to_string(),
                )
            })
    }

    async fn fetch_period(
        &self,
        provider: &str,
        variant: &str,
        owner_user_id: Option<Uuid>,
        period_type: PeriodType,
        period_start: OffsetDateTime,
    ) -> AsrResult<Option<UsagePeriod>> {
        let row = sqlx::query_as::<_, UsagePeriod>(
            r#"
            SELECT owner_user_id, provider, variant, period_type, period_start, period_end,
                   used_seconds, free_quota_used, paid_seconds, total_cost
            FROM usage_periods
            WHERE provider = $1 AND variant = $2
              AND owner_user_id IS NOT DISTINCT FROM $3
              AND period_type = $4 AND period_start = $5
            "#,
        )
        .bind(provider)
        .bind(variant)
        .bind(owner_user_id)
        .bind(period_type)
        .bind(period_start)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// `max(0, free_quota_seconds - free_quota_used)` for the current
    /// period, or 0 when no free tier is configured. Creates the period row
    /// if absent.
    pub async fn remaining_free(
        &self,
        provider: &str,
        variant: &str,
        owner_user_id: Option<Uuid>,
        pricing: &PricingConfig,
        now: OffsetDateTime,
    ) -> AsrResult<f64> {
        if pricing.free_quota_seconds <= 0.0 {
            return Ok(0.0);
        }
        let period = self
            .get_or_create_period(provider, variant, owner_user_id, pricing, now)
            .await?;
        Ok((pricing.free_quota_seconds - period.free_quota_used).max(0.0))
    }

    /// Pure (no lock, no write) version of `consume_quota`, using a snapshot
    /// `remaining_free`.
    pub async fn estimate_cost(
        &self,
        provider: &str,
        variant: &str,
        duration: f64,
        owner_user_id: Option<Uuid>,
        pricing: &PricingConfig,
        now: OffsetDateTime,
    ) -> AsrResult<ConsumptionResult> {
        let remaining = self
            .remaining_free(provider, variant, owner_user_id, pricing, now)
            .await?;
        Ok(split(duration, remaining, pricing.cost_per_hour))
    }

    /// Atomically consume `duration` seconds: free first, then paid.
    /// Takes a row-level exclusive lock on the period row for the duration
    /// of the transaction so two concurrent callers serialise.
    pub async fn consume_quota(
        &self,
        provider: &str,
        variant: &str,
        duration: f64,
        owner_user_id: Option<Uuid>,
        pricing: &PricingConfig,
        now: OffsetDateTime,
    ) -> AsrResult<ConsumptionResult> {
        let mut tx = self.pool.begin().await?;
        let result =
            consume_quota_in_tx(&mut tx, provider, variant, duration, owner_user_id, pricing, now)
                .await?;
        tx.commit().await?;
        Ok(result)
    }
}

/// Core of `consume_quota`, runnable inside a transaction the caller already
/// holds open — used directly by settlement so the period update, the
/// user-quota update, and the ledger insert share a single transaction.
pub(crate) async fn consume_quota_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    provider: &str,
    variant: &str,
    duration: f64,
    owner_user_id: Option<Uuid>,
    pricing: &PricingConfig,
    now: OffsetDateTime,
) -> AsrResult<ConsumptionResult> {
    let (period_type, period_start, period_end) = current_period_bounds(pricing.reset_period, now);

    let existing = sqlx::query_as::<_, UsagePeriod>(
        r#"
        SELECT owner_user_id, provider, variant, period_type, period_start, period_end,
               used_seconds, free_quota_used, paid_seconds, total_cost
        FROM usage_periods
        WHERE provider = $1 AND variant = $2
          AND owner_user_id IS NOT DISTINCT FROM $3
          AND period_type = $4 AND period_start = $5
        FOR UPDATE
        "#,
    )
    .bind(provider)
    .bind(variant)
    .bind(owner_user_id)
    .bind(period_type)
    .bind(period_start)
    .fetch_optional(&mut **tx)
    .await?;

    let period = match existing {
        Some(row) => row,
        None => {
            sqlx::query_as::<_, UsagePeriod>(
                r#"
                INSERT INTO usage_periods
                    (owner_user_id, provider, variant, period_type, period_start, period_end,
                     used_seconds, free_quota_used, paid_seconds, total_cost)
                VALUES ($1, $2, $3, $4, $5, $6, 0, 0, 0, 0)
                ON CONFLICT (owner_user_id, provider, variant, period_type, period_start)
                DO UPDATE SET period_end = EXCLUDED.period_end
                RETURNING owner_user_id, provider, variant, period_type, period_start,
                          period_end, used_seconds, free_quota_used, paid_seconds, total_cost
                "#,
            )
            .bind(owner_user_id)
            .bind(provider)
            .bind(variant)
            .bind(period_type)
            .bind(period_start)
            .bind(period_end)
            .fetch_one(&mut **tx)
            .await?
        }
    };

    let remaining_free = (pricing.free_quota_seconds - period.free_quota_used).max(0.0);
    let result = split(duration, remaining_free, pricing.cost_per_hour);

    sqlx::query(
        r#"
        UPDATE usage_periods
        SET used_seconds = used_seconds + $1,
            free_quota_used = free_quota_used + $2,
            paid_seconds = paid_seconds + $3,
            total_cost = total_cost + $4
        WHERE provider = $5 AND variant = $6
          AND owner_user_id IS NOT DISTINCT FROM $7
          AND period_type = $8 AND period_start = $9
        "#,
    )
    .bind(duration)
    .bind(result.free)
    .bind(result.paid)
    .bind(result.cost)
    .bind(provider)
    .bind(variant)
    .bind(owner_user_id)
    .bind(period_type)
    .bind(period_start)
    .execute(&mut **tx)
    .await?;

    Ok(ConsumptionResult {
        remaining_free: remaining_free - result.free,
        ..result
    })
}

fn split(duration: f64, remaining_free: f64, cost_per_hour: f64) -> ConsumptionResult {
    let free = duration.min(remaining_free).max(0.0);
    let paid = (duration - free).max(0.0);
    let cost = paid / 3600.0 * cost_per_hour;
    ConsumptionResult {
        free,
        paid,
        cost,
        remaining_free: (remaining_free - free).max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use voxledger_shared::ResetPeriod;

    #[test]
    fn monthly_bounds_cover_whole_month() {
        let now = datetime!(2026-01-15 10:00:00 UTC);
        let (period_type, start, end) = current_period_bounds(ResetPeriod::Monthly, now);
        assert_eq!(period_type, PeriodType::Month);
        assert_eq!(start, datetime!(2026-01-01 00:00:00 UTC));
        assert_eq!(end, datetime!(2026-02-01 00:00:00 UTC));
    }

    #[test]
    fn monthly_bounds_roll_over_december() {
        let now = datetime!(2026-12-31 23:59:59.999999 UTC);
        let (_, start, end) = current_period_bounds(ResetPeriod::Monthly, now);
        assert_eq!(start, datetime!(2026-12-01 00:00:00 UTC));
        assert_eq!(end, datetime!(2027-01-01 00:00:00 UTC));
    }

    #[test]
    fn yearly_bounds_cover_whole_year() {
        let now = datetime!(2026-06-01 00:00:00 UTC);
        let (period_type, start, end) = current_period_bounds(ResetPeriod::Yearly, now);
        assert_eq!(period_type, PeriodType::Year);
        assert_eq!(start, datetime!(2026-01-01 00:00:00 UTC));
        assert_eq!(end, datetime!(2027-01-01 00:00:00 UTC));
    }

    #[test]
    fn none_reset_uses_sentinel_bounds() {
        let now = datetime!(2026-06-01 00:00:00 UTC);
        let (period_type, start, end) = current_period_bounds(ResetPeriod::None, now);
        assert_eq!(period_type, PeriodType::Total);
        assert_eq!(start, datetime!(1970-01-01 00:00:00 UTC));
        assert_eq!(end, datetime!(2099-12-31 23:59:59.999999 UTC));
    }

    #[test]
    fn split_first_consumption_fresh_monthly_tier() {
        // Scenario 1: cost_per_hour=3.10, duration=600, remaining_free=18000
        let result = split(600.0, 18000.0, 3.10);
        assert_eq!(result.free, 600.0);
        assert_eq!(result.paid, 0.0);
        assert_eq!(result.cost, 0.0);
        assert_eq!(result.remaining_free, 17400.0);
    }

    #[test]
    fn split_spillover() {
        // Scenario 2: remaining_free=100 (18000-17900), duration=300
        let result = split(300.0, 100.0, 3.10);
        assert_eq!(result.free, 100.0);
        assert_eq!(result.paid, 200.0);
        assert!((result.cost - (200.0 / 3600.0 * 3.10)).abs() < 1e-9);
        assert_eq!(result.remaining_free, 0.0);
    }

    #[test]
    fn split_no_free_tier() {
        // Scenario 3: cost_per_hour=2.5, free_quota_seconds=0, duration=3600
        let result = split(3600.0, 0.0, 2.5);
        assert_eq!(result.free, 0.0);
        assert_eq!(result.paid, 3600.0);
        assert_eq!(result.cost, 2.5);
        assert_eq!(result.remaining_free, 0.0);
    }

    #[test]
    fn split_exact_remaining_free_leaves_nothing_paid() {
        let result = split(100.0, 100.0, 3.10);
        assert_eq!(result.paid, 0.0);
        assert_eq!(result.cost, 0.0);
        assert_eq!(result.remaining_free, 0.0);

        // Next consumption of epsilon settles free = 0.
        let next = split(0.001, result.remaining_free, 3.10);
        assert_eq!(next.free, 0.0);
        assert!(next.paid > 0.0);
    }
}
