//! User-quota limiter (component C)
//!
//! Per-user caps on (provider, variant) consumption within named windows,
//! with user-scoped rows shadowing global ones for the same window key.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::{Date, Month, OffsetDateTime, Time};
use uuid::Uuid;

use crate::error::AsrResult;
use voxledger_shared::{QuotaStatus, WindowType};

/// A quota cap for one (owner?, provider, variant, window).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserQuota {
    pub owner_user_id: Option<Uuid>,
    pub provider: String,
    pub variant: String,
    pub window_type: WindowType,
    pub window_start: OffsetDateTime,
    pub window_end: OffsetDateTime,
    pub quota_seconds: f64,
    pub used_seconds: f64,
    pub status: QuotaStatus,
}

impl UserQuota {
    fn recomputed_status(used_seconds: f64, quota_seconds: f64) -> QuotaStatus {
        if used_seconds >= quota_seconds || quota_seconds == 0.0 {
            QuotaStatus::Exhausted
        } else {
            QuotaStatus::Active
        }
    }

    fn is_available(&self) -> bool {
        self.status != QuotaStatus::Exhausted
            && self.quota_seconds > 0.0
            && self.used_seconds < self.quota_seconds
    }
}

/// Fixed sentinel window for `window_type = total` when no explicit bounds
/// are supplied.
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

/// Resolve `(window_start, window_end)` for `window_type`, anchored at `now`.
/// `total` accepts explicit caller-supplied bounds; falling back to the
/// sentinel window when the caller omits both (see DESIGN.md open-question
/// resolution).
pub fn window_bounds(
    window_type: WindowType,
    now: OffsetDateTime,
    explicit: Option<(OffsetDateTime, OffsetDateTime)>,
) -> (OffsetDateTime, OffsetDateTime) {
    match window_type {
        WindowType::Day => {
            let start = now.date().with_time(Time::MIDNIGHT).assume_utc();
            let end = start + time::Duration::days(1);
            (start, end)
        }
        WindowType::Month => {
            let start = Date::from_calendar_date(now.year(), now.month(), 1)
                .expect("valid date")
                .with_time(Time::MIDNIGHT)
                .assume_utc();
            let (next_year, next_month) = if now.month() == Month::December {
                (now.year() + 1, Month::January)
            } else {
                (now.year(), now.month().next())
            };
            let end = Date::from_calendar_date(next_year, next_month, 1)
                .expect("valid date")
                .with_time(Time::MIDNIGHT)
                .assume_utc();
            (start, end)
        }
        WindowType::Total => explicit.unwrap_or_else(sentinel_bounds),
    }
}

/// Caller input for `upsert_quota`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertQuotaRequest {
    pub owner_user_id: Option<Uuid>,
    pub provider: String,
    pub variant: String,
    pub window_type: WindowType,
    pub window_start: Option<OffsetDateTime>,
    pub window_end: Option<OffsetDateTime>,
    pub quota_seconds: f64,
    pub used_seconds_override: Option<f64>,
    pub reset: bool,
}

/// Per-user quota cap enforcement.
#[derive(Clone)]
pub struct UserQuotaLimiter {
    pool: PgPool,
}

impl UserQuotaLimiter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All rows for (provider, variant) whose window contains `now` and
    /// whose owner is NULL or `user_id`.
    async fn candidate_rows(
        &self,
        provider: &str,
        variant: &str,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> AsrResult<Vec<UserQuota>> {
        let rows = sqlx::query_as::<_, UserQuota>(
            r#"
            SELECT owner_user_id, provider, variant, window_type, window_start, window_end,
                   quota_seconds, used_seconds, status
            FROM user_quotas
            WHERE provider = $1 AND variant = $2
              AND window_start <= $3 AND window_end >= $3
              AND (owner_user_id IS NULL OR owner_user_id = $4)
            "#,
        )
        .bind(provider)
        .bind(variant)
        .bind(now)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The effective set: user-scoped rows if any exist, else global rows.
    /// Per-user rows fully shadow global ones for the same window key; they
    /// never aggregate.
    pub async fn effective_rows(
        &self,
        provider: &str,
        variant: &str,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> AsrResult<Vec<UserQuota>> {
        let rows = self.candidate_rows(provider, variant, user_id, now).await?;
        let (scoped, global): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|r| r.owner_user_id.is_some());
        Ok(if !scoped.is_empty() { scoped } else { global })
    }

    /// Is (provider, variant) available for `user_id` at `now`? True when
    /// the effective set is empty (no limit configured) or every row in it
    /// is non-exhausted.
    pub async fn is_available(
        &self,
        provider: &str,
        variant: &str,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> AsrResult<bool> {
        let effective = self.effective_rows(provider, variant, user_id, now).await?;
        Ok(effective.is_empty() || effective.iter().all(UserQuota::is_available))
    }

    /// Apply `duration` seconds of usage to every row in the effective set,
    /// marking each exhausted once its new `used_seconds >= quota_seconds`.
    /// Each row is locked for the duration of its own update so concurrent
    /// callers serialise per row.
    pub async fn record_usage(
        &self,
        provider: &str,
        variant: &str,
        duration: f64,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> AsrResult<()> {
        let effective = self.effective_rows(provider, variant, user_id, now).await?;
        if effective.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        record_usage_in_tx(&mut tx, provider, variant, duration, &effective).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Administrative writer: create or update a quota row for a window.
    pub async fn upsert_quota(&self, req: UpsertQuotaRequest) -> AsrResult<UserQuota> {
        let now = OffsetDateTime::now_utc();
        let explicit = match (req.window_start, req.window_end) {
            (Some(s), Some(e)) => Some((s, e)),
            _ => None,
        };
        let (window_start, window_end) = window_bounds(req.window_type, now, explicit);

        let existing = sqlx::query_as::<_, UserQuota>(
            r#"
            SELECT owner_user_id, provider, variant, window_type, window_start, window_end,
                   quota_seconds, used_seconds, status
            FROM user_quotas
            WHERE provider = $1 AND variant = $2 AND window_type = $3 AND window_start = $4
              AND owner_user_id IS NOT DISTINCT FROM $5
            "#,
        )
        .bind(&req.provider)
        .bind(&req.variant)
        .bind(req.window_type)
        .bind(window_start)
        .bind(req.owner_user_id)
        .fetch_optional(&self.pool)
        .await?;

        let used_seconds = match &existing {
            None => req.used_seconds_override.unwrap_or(0.0),
            Some(row) => {
                if let Some(override_value) = req.used_seconds_override {
                    override_value
                } else if req.reset {
                    0.0
                } else {
                    row.used_seconds
                }
            }
        };
        let status = UserQuota::recomputed_status(used_seconds, req.quota_seconds);

        let row = sqlx::query_as::<_, UserQuota>(
            r#"
            INSERT INTO user_quotas
                (owner_user_id, provider, variant, window_type, window_start, window_end,
                 quota_seconds, used_seconds, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (owner_user_id, provider, variant, window_type, window_start) DO UPDATE
            SET quota_seconds = EXCLUDED.quota_seconds,
                used_seconds = EXCLUDED.used_seconds,
                status = EXCLUDED.status,
                window_end = EXCLUDED.window_end
            RETURNING owner_user_id, provider, variant, window_type, window_start, window_end,
                      quota_seconds, used_seconds, status
            "#,
        )
        .bind(req.owner_user_id)
        .bind(&req.provider)
        .bind(&req.variant)
        .bind(req.window_type)
        .bind(window_start)
        .bind(window_end)
        .bind(req.quota_seconds)
        .bind(used_seconds)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }
}

/// Apply `duration` seconds of usage to every row in `effective` within an
/// already-open transaction, so settlement can fold this into the same
/// commit as period consumption and the ledger insert.
pub(crate) async fn record_usage_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    provider: &str,
    variant: &str,
    duration: f64,
    effective: &[UserQuota],
) -> AsrResult<()> {
    for row in effective {
        let locked = sqlx::query_as::<_, UserQuota>(
            r#"
            SELECT owner_user_id, provider, variant, window_type, window_start, window_end,
                   quota_seconds, used_seconds, status
            FROM user_quotas
            WHERE provider = $1 AND variant = $2 AND window_type = $3 AND window_start = $4
              AND owner_user_id IS NOT DISTINCT FROM $5
            FOR UPDATE
            "#,
        )
        .bind(provider)
        .bind(variant)
        .bind(row.window_type)
        .bind(row.window_start)
        .bind(row.owner_user_id)
        .fetch_one(&mut **tx)
        .await?;

        let new_used = locked.used_seconds + duration;
        let new_status = UserQuota::recomputed_status(new_used, locked.quota_seconds);

        sqlx::query(
            r#"
            UPDATE user_quotas
            SET used_seconds = $1, status = $2
            WHERE provider = $3 AND variant = $4 AND window_type = $5 AND window_start = $6
              AND owner_user_id IS NOT DISTINCT FROM $7
            "#,
        )
        .bind(new_used)
        .bind(new_status)
        .bind(provider)
        .bind(variant)
        .bind(row.window_type)
        .bind(row.window_start)
        .bind(row.owner_user_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn row(owner: Option<Uuid>, quota: f64, used: f64, status: QuotaStatus) -> UserQuota {
        UserQuota {
            owner_user_id: owner,
            provider: "tencent".to_string(),
            variant: "file".to_string(),
            window_type: WindowType::Month,
            window_start: datetime!(2026-01-01 00:00:00 UTC),
            window_end: datetime!(2026-02-01 00:00:00 UTC),
            quota_seconds: quota,
            used_seconds: used,
            status,
        }
    }

    #[test]
    fn is_available_true_when_under_quota() {
        let r = row(Some(Uuid::new_v4()), 1000.0, 500.0, QuotaStatus::Active);
        assert!(r.is_available());
    }

    #[test]
    fn is_available_false_when_exhausted() {
        let r = row(Some(Uuid::new_v4()), 1000.0, 1000.0, QuotaStatus::Exhausted);
        assert!(!r.is_available());
    }

    #[test]
    fn zero_quota_row_is_unavailable_even_if_marked_active() {
        let r = row(Some(Uuid::new_v4()), 0.0, 0.0, QuotaStatus::Active);
        assert!(!r.is_available());
    }

    #[test]
    fn recomputed_status_exhausts_at_or_above_cap() {
        assert_eq!(
            UserQuota::recomputed_status(1000.0, 1000.0),
            QuotaStatus::Exhausted
        );
        assert_eq!(
            UserQuota::recomputed_status(999.0, 1000.0),
            QuotaStatus::Active
        );
        assert_eq!(UserQuota::recomputed_status(0.0, 0.0), QuotaStatus::Exhausted);
    }

    #[test]
    fn day_window_spans_exactly_one_day() {
        let now = datetime!(2026-03-10 14:30:00 UTC);
        let (start, end) = window_bounds(WindowType::Day, now, None);
        assert_eq!(start, datetime!(2026-03-10 00:00:00 UTC));
        assert_eq!(end, datetime!(2026-03-11 00:00:00 UTC));
    }

    #[test]
    fn total_window_falls_back_to_sentinel_without_explicit_bounds() {
        let now = datetime!(2026-03-10 14:30:00 UTC);
        let (start, end) = window_bounds(WindowType::Total, now, None);
        assert_eq!(start, datetime!(1970-01-01 00:00:00 UTC));
        assert_eq!(end, datetime!(2099-12-31 23:59:59.999999 UTC));
    }

    #[test]
    fn total_window_honours_explicit_bounds() {
        let now = datetime!(2026-03-10 14:30:00 UTC);
        let explicit = (
            datetime!(2026-01-01 00:00:00 UTC),
            datetime!(2026-12-31 23:59:59 UTC),
        );
        let (start, end) = window_bounds(WindowType::Total, now, Some(explicit));
        assert_eq!(start, explicit.0);
        assert_eq!(end, explicit.1);
    }
}
