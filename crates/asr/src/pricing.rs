//! Pricing registry (component A)
//!
//! A read-mostly keyed lookup of `(provider, variant) -> PricingConfig`,
//! backed by Postgres with a process-local cache invalidated on every
//! administrative write.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::{AsrError, AsrResult};
use voxledger_shared::ResetPeriod;

/// Pricing, free-tier allowance, and capability flags for one
/// (provider, variant) pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PricingConfig {
    pub provider: String,
    pub variant: String,
    pub cost_per_hour: f64,
    pub free_quota_seconds: f64,
    pub reset_period: ResetPeriod,
    pub is_enabled: bool,
    pub quality_score: f64,
    pub supports_diarization: bool,
    pub supports_word_level: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl PricingConfig {
    /// `free_quota_seconds > 0 ⇒ reset_period ≠ none`.
    fn validate(&self) -> AsrResult<()> {
        if self.free_quota_seconds > 0.0 && self.reset_period == ResetPeriod::None {
            return Err(AsrError::InvalidParameter(
                "free_quota_seconds > 0 requires a non-none reset_period".to_string(),
            ));
        }
        if self.cost_per_hour < 0.0 {
            return Err(AsrError::InvalidParameter(
                "cost_per_hour must be >= 0".to_string(),
            ));
        }
        if self.free_quota_seconds < 0.0 {
            return Err(AsrError::InvalidParameter(
                "free_quota_seconds must be >= 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.quality_score) {
            return Err(AsrError::InvalidParameter(
                "quality_score must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

type PricingKey = (String, String);

/// Admin-facing fields for creating or updating a `PricingConfig`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertPricingRequest {
    pub cost_per_hour: f64,
    pub free_quota_seconds: f64,
    pub reset_period: ResetPeriod,
    pub is_enabled: bool,
    pub quality_score: f64,
    pub supports_diarization: bool,
    pub supports_word_level: bool,
}

/// `(provider, variant) -> PricingConfig` lookup with a local cache.
#[derive(Clone)]
pub struct PricingRegistry {
    pool: PgPool,
    cache: Arc<RwLock<HashMap<PricingKey, PricingConfig>>>,
}

impl PricingRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Look up a single (provider, variant) pair.
    ///
    /// A pair absent from `pricing_configs` is "not orchestratable" — this
    /// returns `Ok(None)`, never an error; callers (scheduler, pre-check)
    /// treat that as "omit this pair".
    pub async fn get(&self, provider: &str, variant: &str) -> AsrResult<Option<PricingConfig>> {
        let key = (provider.to_string(), variant.to_string());
        if let Some(cached) = self.cache.read().await.get(&key) {
            return Ok(Some(cached.clone()));
        }

        let row = sqlx::query_as::<_, PricingConfig>(
            r#"
            SELECT provider, variant, cost_per_hour, free_quota_seconds, reset_period,
                   is_enabled, quality_score, supports_diarization, supports_word_level,
                   created_at, updated_at
            FROM pricing_configs
            WHERE provider = $1 AND variant = $2
            "#,
        )
        .bind(provider)
        .bind(variant)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(ref config) = row {
            self.cache.write().await.insert(key, config.clone());
        }
        Ok(row)
    }

    /// All enabled (provider, variant) pairs.
    pub async fn list_enabled(&self) -> AsrResult<Vec<PricingConfig>> {
        let rows = sqlx::query_as::<_, PricingConfig>(
            r#"
            SELECT provider, variant, cost_per_hour, free_quota_seconds, reset_period,
                   is_enabled, quality_score, supports_diarization, supports_word_level,
                   created_at, updated_at
            FROM pricing_configs
            WHERE is_enabled = true
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Every (provider, variant) with a nonzero platform free tier.
    pub async fn list_with_free_tier(&self) -> AsrResult<Vec<PricingConfig>> {
        let rows = sqlx::query_as::<_, PricingConfig>(
            r#"
            SELECT provider, variant, cost_per_hour, free_quota_seconds, reset_period,
                   is_enabled, quality_score, supports_diarization, supports_word_level,
                   created_at, updated_at
            FROM pricing_configs
            WHERE free_quota_seconds > 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Create or update a pricing config and invalidate the cache entry
    /// before returning, so no caller observes stale cost/feature flags
    /// once this call has committed.
    pub async fn upsert(
        &self,
        provider: &str,
        variant: &str,
        req: UpsertPricingRequest,
    ) -> AsrResult<PricingConfig> {
        let now = OffsetDateTime::now_utc();
        let candidate = PricingConfig {
            provider: provider.to_string(),
            variant: variant.to_string(),
            cost_per_hour: req.cost_per_hour,
            free_quota_seconds: req.free_quota_seconds,
            reset_period: req.reset_period,
            is_enabled: req.is_enabled,
            quality_score: req.quality_score,
            supports_diarization: req.supports_diarization,
            supports_word_level: req.supports_word_level,
            created_at: now,
            updated_at: now,
        };
        candidate.validate()?;

        let row = sqlx::query_as::<_, PricingConfig>(
            r#"
            INSERT INTO pricing_configs
                (provider, variant, cost_per_hour, free_quota_seconds, reset_period,
                 is_enabled, quality_score, supports_diarization, supports_word_level,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            ON CONFLICT (provider, variant) DO UPDATE SET
                cost_per_hour = EXCLUDED.cost_per_hour,
                free_quota_seconds = EXCLUDED.free_quota_seconds,
                reset_period = EXCLUDED.reset_period,
                is_enabled = EXCLUDED.is_enabled,
                quality_score = EXCLUDED.quality_score,
                supports_diarization = EXCLUDED.supports_diarization,
                supports_word_level = EXCLUDED.supports_word_level,
                updated_at = EXCLUDED.updated_at
            RETURNING provider, variant, cost_per_hour, free_quota_seconds, reset_period,
                      is_enabled, quality_score, supports_diarization, supports_word_level,
                      created_at, updated_at
            "#,
        )
        .bind(&candidate.provider)
        .bind(&candidate.variant)
        .bind(candidate.cost_per_hour)
        .bind(candidate.free_quota_seconds)
        .bind(candidate.reset_period)
        .bind(candidate.is_enabled)
        .bind(candidate.quality_score)
        .bind(candidate.supports_diarization)
        .bind(candidate.supports_word_level)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let key = (provider.to_string(), variant.to_string());
        self.cache.write().await.insert(key, row.clone());
        tracing::info!(provider, variant, "pricing config upserted, cache refreshed");
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(free_quota_seconds: f64, reset_period: ResetPeriod) -> PricingConfig {
        let now = OffsetDateTime::now_utc();
        PricingConfig {
            provider: "tencent".to_string(),
            variant: "file_fast".to_string(),
            cost_per_hour: 3.10,
            free_quota_seconds,
            reset_period,
            is_enabled: true,
            quality_score: 0.9,
            supports_diarization: false,
            supports_word_level: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn rejects_free_tier_without_reset_period() {
        let config = sample(18000.0, ResetPeriod::None);
        assert!(matches!(
            config.validate(),
            Err(AsrError::InvalidParameter(_))
        ));
    }

    #[test]
    fn accepts_free_tier_with_monthly_reset() {
        let config = sample(18000.0, ResetPeriod::Monthly);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn accepts_no_free_tier_with_no_reset() {
        let config = sample(0.0, ResetPeriod::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_negative_cost() {
        let mut config = sample(0.0, ResetPeriod::None);
        config.cost_per_hour = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_quality() {
        let mut config = sample(0.0, ResetPeriod::None);
        config.quality_score = 1.5;
        assert!(config.validate().is_err());
    }
}
