//! VoxLedger API server entry point

use std::sync::Arc;

use voxledger_api::{routes::build_router, AppState, Config};
use voxledger_asr::{FixedDurationProvider, HttpVideoProbe, ProviderRegistry};
use voxledger_shared::{create_pool, create_migration_pool, run_migrations};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::from_env()?;

    let migration_pool = create_migration_pool(&config.database_url).await?;
    run_migrations(&migration_pool).await?;
    migration_pool.close().await;

    let pool = create_pool(&config.database_url).await?;

    // Concrete ASR provider SDKs are the worker's concern, not the API's,
    // but pre-check scheduling needs the same registered providers the
    // worker executes against, or every candidate set is empty.
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(FixedDurationProvider::new("tencent", 600.0)));
    registry.register(Arc::new(FixedDurationProvider::new("aliyun", 3600.0)));
    let registry = Arc::new(registry);

    let bind_address = config.bind_address.clone();
    let probe = Arc::new(HttpVideoProbe::new());
    let state = AppState::with_probe(pool, config, registry, probe);

    let router = build_router(state);

    tracing::info!(%bind_address, "starting voxledger-api");
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
