//! Multi-criteria provider scheduler (component D)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AsrResult;
use crate::period::PeriodAccountant;
use crate::pricing::PricingRegistry;
use crate::quota::UserQuotaLimiter;
use crate::registry::ProviderRegistry;

/// Liveness of a provider as reported by an external health subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Collaborator the scheduler consults for provider liveness. Implementations
/// are expected to swallow their own transport errors and report `Healthy`
/// for them ("failure of the checker -> treat as 1.0"), so `check` itself is
/// infallible from the scheduler's point of view.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, provider: &str) -> HealthStatus;
}

/// Default health checker used when no live health subsystem is wired in:
/// every provider is reported healthy.
pub struct AlwaysHealthy;

#[async_trait]
impl HealthChecker for AlwaysHealthy {
    async fn check(&self, _provider: &str) -> HealthStatus {
        HealthStatus::Healthy
    }
}

/// Feature flags a task may assert, used both for the candidate-set
/// eligibility filter (none today — features only affect scoring) and the
/// `features` scoring dimension.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskFeatures {
    pub diarization: bool,
    pub word_level: bool,
}

impl TaskFeatures {
    fn is_empty(&self) -> bool {
        !self.diarization && !self.word_level
    }

    fn required(&self) -> u32 {
        self.diarization as u32 + self.word_level as u32
    }
}

/// The six scoring dimension weights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Weights {
    pub free_quota: f64,
    pub health: f64,
    pub cost: f64,
    pub quota: f64,
    pub quality: f64,
    pub features: f64,
}

impl Weights {
    pub const fn default_weights() -> Self {
        Self {
            free_quota: 0.30,
            health: 0.20,
            cost: 0.15,
            quota: 0.10,
            quality: 0.15,
            features: 0.10,
        }
    }

    pub const fn feature_sensitive() -> Self {
        Self {
            free_quota: 0.20,
            health: 0.15,
            cost: 0.10,
            quota: 0.10,
            quality: 0.15,
            features: 0.30,
        }
    }

    fn select(task_features: TaskFeatures, override_weights: Option<Weights>) -> Self {
        if let Some(w) = override_weights {
            return w;
        }
        if task_features.diarization || task_features.word_level {
            Self::feature_sensitive()
        } else {
            Self::default_weights()
        }
    }
}

/// The six sub-scores (each in [0, 1]) computed for one candidate, plus the
/// weighted total.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubScores {
    pub free_quota: f64,
    pub health: f64,
    pub cost: f64,
    pub quota: f64,
    pub quality: f64,
    pub features: f64,
}

impl SubScores {
    fn total(&self, weights: &Weights) -> f64 {
        self.free_quota * weights.free_quota
            + self.health * weights.health
            + self.cost * weights.cost
            + self.quota * weights.quota
            + self.quality * weights.quality
            + self.features * weights.features
    }
}

/// One row of the ranked score table, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    pub provider: String,
    pub scores: SubScores,
    pub total: f64,
}

/// Input to a scheduling decision.
#[derive(Debug, Clone, Default)]
pub struct ScheduleRequest {
    pub user: Option<Uuid>,
    pub variant: String,
    pub preferred_providers: Option<Vec<String>>,
    pub weights: Option<Weights>,
    pub task_features: TaskFeatures,
}

const DEFAULT_COST_PER_HOUR: f64 = 2.0;
const DEFAULT_QUALITY_SCORE: f64 = 0.8;

/// Ranks candidate providers for a variant along six weighted dimensions and
/// picks the highest-scoring eligible one.
#[derive(Clone)]
pub struct Scheduler {
    registry: std::sync::Arc<ProviderRegistry>,
    pricing: PricingRegistry,
    period: PeriodAccountant,
    quota: UserQuotaLimiter,
    health: std::sync::Arc<dyn HealthChecker>,
}

impl Scheduler {
    pub fn new(
        registry: std::sync::Arc<ProviderRegistry>,
        pricing: PricingRegistry,
        period: PeriodAccountant,
        quota: UserQuotaLimiter,
        health: std::sync::Arc<dyn HealthChecker>,
    ) -> Self {
        Self {
            registry,
            pricing,
            period,
            quota,
            health,
        }
    }

    /// Step 1: registered providers intersected with `preferred_providers`,
    /// falling back to the full set when the intersection is empty.
    fn candidate_set(&self, req: &ScheduleRequest) -> Vec<String> {
        let all = self.registry.names();
        match &req.preferred_providers {
            None => all,
            Some(preferred) => {
                let intersected: Vec<String> = all
                    .iter()
                    .filter(|p| preferred.contains(p))
                    .cloned()
                    .collect();
                if intersected.is_empty() {
                    all
                } else {
                    intersected
                }
            }
        }
    }

    /// Step 2: eligibility filter. Returns providers that are quota-available,
    /// have platform free-tier seconds remaining, or carry no quota row at
    /// all (the union of all three, per spec.md's rationale that platform
    /// free-tier seconds are not gated by user quotas).
    async fn eligible(
        &self,
        candidates: &[String],
        variant: &str,
        user: Option<Uuid>,
        now: OffsetDateTime,
    ) -> AsrResult<Vec<String>> {
        let mut eligible = Vec::new();
        for provider in candidates {
            let available = match user {
                Some(user_id) => self.quota.is_available(provider, variant, user_id, now).await?,
                None => true,
            };
            let unlimited = match user {
                Some(user_id) => self
                    .quota
                    .effective_rows(provider, variant, user_id, now)
                    .await?
                    .is_empty(),
                None => true,
            };
            let has_free_remaining = match self.pricing.get(provider, variant).await? {
                Some(pricing) if pricing.free_quota_seconds > 0.0 => {
                    self.period
                        .remaining_free(provider, variant, None, &pricing, now)
                        .await?
                        > 0.0
                }
                _ => false,
            };

            if available || has_free_remaining || unlimited {
                eligible.push(provider.clone());
            }
        }
        Ok(eligible)
    }

    /// Step 3: per-candidate sub-scores. Providers reported unhealthy are
    /// dropped before scoring (`None`).
    async fn score(
        &self,
        provider: &str,
        variant: &str,
        user: Option<Uuid>,
        task_features: TaskFeatures,
        now: OffsetDateTime,
    ) -> AsrResult<Option<SubScores>> {
        let health = self.health.check(provider).await;
        if health == HealthStatus::Unhealthy {
            return Ok(None);
        }
        let health_score = match health {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Unhealthy => 0.0,
            HealthStatus::Unknown => 0.5,
        };

        let pricing = self.pricing.get(provider, variant).await?;

        let free_quota_score = match &pricing {
            Some(p) if p.free_quota_seconds > 0.0 => {
                let remaining = self
                    .period
                    .remaining_free(provider, variant, None, p, now)
                    .await?;
                remaining / p.free_quota_seconds
            }
            _ => 0.0,
        };

        let cost_per_hour = pricing
            .as_ref()
            .map(|p| p.cost_per_hour)
            .unwrap_or(DEFAULT_COST_PER_HOUR);
        let cost_score = (1.0 - cost_per_hour / 5.0).max(0.0);

        let quota_score = match user {
            Some(user_id) => {
                let effective = self
                    .quota
                    .effective_rows(provider, variant, user_id, now)
                    .await?;
                if effective.is_empty() {
                    1.0
                } else {
                    let total_quota: f64 = effective.iter().map(|r| r.quota_seconds).sum();
                    let total_used: f64 = effective.iter().map(|r| r.used_seconds).sum();
                    if total_quota > 0.0 {
                        ((total_quota - total_used) / total_quota).max(0.0)
                    } else {
                        0.0
                    }
                }
            }
            None => 1.0,
        };

        let quality_score = pricing.as_ref().map(|p| p.quality_score).unwrap_or(DEFAULT_QUALITY_SCORE);

        let features_score = if task_features.is_empty() {
            0.5
        } else {
            let required = task_features.required();
            let matched = match &pricing {
                Some(p) => {
                    (task_features.diarization && p.supports_diarization) as u32
                        + (task_features.word_level && p.supports_word_level) as u32
                }
                None => 0,
            };
            matched as f64 / required as f64
        };

        Ok(Some(SubScores {
            free_quota: free_quota_score,
            health: health_score,
            cost: cost_score,
            quota: quota_score,
            quality: quality_score,
            features: features_score,
        }))
    }

    /// Full ranked score table for diagnostics (and internally, selection).
    pub async fn scores(&self, req: &ScheduleRequest, now: OffsetDateTime) -> AsrResult<Vec<ScoreBreakdown>> {
        let candidates = self.candidate_set(req);
        let eligible = self
            .eligible(&candidates, &req.variant, req.user, now)
            .await?;
        let weights = Weights::select(req.task_features, req.weights);

        let mut breakdowns = Vec::new();
        for provider in &eligible {
            if let Some(scores) = self
                .score(provider, &req.variant, req.user, req.task_features, now)
                .await?
            {
                let total = scores.total(&weights);
                breakdowns.push(ScoreBreakdown {
                    provider: provider.clone(),
                    scores,
                    total,
                });
            }
        }
        Ok(breakdowns)
    }

    /// Step 5: the highest-scoring eligible provider, or `None` when no
    /// provider survives eligibility/health filtering. Ties break by the
    /// earlier provider in candidate-list order.
    pub async fn select(&self, req: &ScheduleRequest, now: OffsetDateTime) -> AsrResult<Option<String>> {
        let breakdowns = self.scores(req, now).await?;
        let mut best: Option<&ScoreBreakdown> = None;
        for candidate in &breakdowns {
            match best {
                None => best = Some(candidate),
                Some(current) if candidate.total > current.total => best = Some(candidate),
                _ => {}
            }
        }
        Ok(best.map(|b| b.provider.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let w = Weights::default_weights();
        let sum = w.free_quota + w.health + w.cost + w.quota + w.quality + w.features;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn feature_sensitive_weights_sum_to_one() {
        let w = Weights::feature_sensitive();
        let sum = w.free_quota + w.health + w.cost + w.quota + w.quality + w.features;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn diarization_triggers_feature_sensitive_weights() {
        let features = TaskFeatures {
            diarization: true,
            word_level: false,
        };
        let w = Weights::select(features, None);
        assert_eq!(w.features, Weights::feature_sensitive().features);
    }

    #[test]
    fn no_features_uses_default_weights() {
        let w = Weights::select(TaskFeatures::default(), None);
        assert_eq!(w.features, Weights::default_weights().features);
    }

    #[test]
    fn caller_weights_override_both_builtins() {
        let custom = Weights {
            free_quota: 1.0,
            health: 0.0,
            cost: 0.0,
            quota: 0.0,
            quality: 0.0,
            features: 0.0,
        };
        let w = Weights::select(
            TaskFeatures {
                diarization: true,
                word_level: false,
            },
            Some(custom),
        );
        assert_eq!(w.free_quota, 1.0);
    }

    // Scenario 4: diarization-requiring task picks the provider that
    // supports it even though it scores lower on cost and quality.
    #[test]
    fn feature_sensitive_scoring_favours_diarization_support() {
        let weights = Weights::feature_sensitive();
        let features = TaskFeatures {
            diarization: true,
            word_level: false,
        };

        let scores_a = SubScores {
            free_quota: 0.0,
            health: 1.0,
            cost: (1.0 - 2.0_f64 / 5.0).max(0.0),
            quota: 1.0,
            quality: 0.9,
            features: 1.0, // matched=1/required=1
        };
        let scores_b = SubScores {
            free_quota: 0.5,
            health: 1.0,
            cost: (1.0 - 1.5_f64 / 5.0).max(0.0),
            quota: 1.0,
            quality: 0.95,
            features: 0.0,
        };

        assert!(!features.is_empty());
        assert!(scores_a.total(&weights) > scores_b.total(&weights));
    }

    #[test]
    fn empty_task_features_score_half() {
        let features = TaskFeatures::default();
        assert!(features.is_empty());
    }
}
