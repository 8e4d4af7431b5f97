//! Shared application state, built once at startup and cloned into every
//! request handler.

use std::sync::Arc;

use sqlx::PgPool;

use voxledger_asr::{
    AlwaysAvailable, AlwaysHealthy, PeriodAccountant, PreCheckGate, PricingRegistry,
    ProviderRegistry, Scheduler, Settlement, UserQuotaLimiter, VideoProbe,
};

use crate::config::Config;

/// Everything a request handler needs, built once and shared across
/// connections via `axum::extract::State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub pricing: PricingRegistry,
    pub period: PeriodAccountant,
    pub quota: UserQuotaLimiter,
    pub registry: Arc<ProviderRegistry>,
    pub scheduler: Scheduler,
    pub precheck: PreCheckGate,
    pub settlement: Settlement,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, registry: Arc<ProviderRegistry>) -> Self {
        Self::with_probe(pool, config, registry, Arc::new(AlwaysAvailable))
    }

    pub fn with_probe(
        pool: PgPool,
        config: Config,
        registry: Arc<ProviderRegistry>,
        probe: Arc<dyn VideoProbe>,
    ) -> Self {
        let pricing = PricingRegistry::new(pool.clone());
        let period = PeriodAccountant::new(pool.clone());
        let quota = UserQuotaLimiter::new(pool.clone());
        let scheduler = Scheduler::new(
            registry.clone(),
            pricing.clone(),
            period.clone(),
            quota.clone(),
            Arc::new(AlwaysHealthy),
        );
        let precheck = PreCheckGate::new(pool.clone(), scheduler.clone(), pricing.clone(), probe);
        let settlement = Settlement::new(pool.clone(), pricing.clone(), quota.clone());

        Self {
            pool,
            config: Arc::new(config),
            pricing,
            period,
            quota,
            registry,
            scheduler,
            precheck,
            settlement,
        }
    }
}
