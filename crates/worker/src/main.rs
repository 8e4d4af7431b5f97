//! VoxLedger worker
//!
//! Polls for queued tasks, runs them against the provider the scheduler
//! picked at pre-check time, and settles the result. The worker owns task
//! execution; the core crate only knows how to schedule, gate, and charge.

mod config;

use std::sync::Arc;

use sqlx::Row;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use voxledger_asr::{
    AlwaysHealthy, AudioReference, FixedDurationProvider, PeriodAccountant, PricingRegistry,
    ProviderRegistry, ScheduleRequest, Scheduler, Settlement, SettleFailure, SettleSuccess,
    TaskFeatures, UserQuotaLimiter,
};
use voxledger_shared::{create_migration_pool, create_pool, run_migrations};

use config::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = WorkerConfig::from_env()?;

    let migration_pool = create_migration_pool(&config.database_url).await?;
    run_migrations(&migration_pool).await?;
    migration_pool.close().await;

    let pool = create_pool(&config.database_url).await?;

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(FixedDurationProvider::new("tencent", 600.0)));
    registry.register(Arc::new(FixedDurationProvider::new("aliyun", 3600.0)));
    let registry = Arc::new(registry);

    let pricing = PricingRegistry::new(pool.clone());
    let period = PeriodAccountant::new(pool.clone());
    let quota = UserQuotaLimiter::new(pool.clone());
    let asr_scheduler = Scheduler::new(
        registry.clone(),
        pricing.clone(),
        period,
        quota.clone(),
        Arc::new(AlwaysHealthy),
    );
    let settlement = Settlement::new(pool.clone(), pricing, quota);

    let cron_scheduler = JobScheduler::new().await?;
    let stuck_pool = pool.clone();
    cron_scheduler
        .add(Job::new_async(config.reconcile_cron.as_str(), move |_, _| {
            let pool = stuck_pool.clone();
            Box::pin(async move {
                if let Err(err) = requeue_stuck_tasks(&pool).await {
                    tracing::error!(error = %err, "stuck-task sweep failed");
                }
            })
        })?)
        .await?;
    cron_scheduler.start().await?;

    tracing::info!("starting voxledger-worker poll loop");
    loop {
        if let Err(err) = poll_once(&pool, &registry, &settlement, &asr_scheduler).await {
            tracing::error!(error = %err, "poll iteration failed");
        }
        tokio::time::sleep(config.poll_interval).await;
    }
}

/// One polling iteration: claim up to one queued task and run it to
/// completion (success or failure settlement).
async fn poll_once(
    pool: &sqlx::PgPool,
    registry: &ProviderRegistry,
    settlement: &Settlement,
    scheduler: &Scheduler,
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    let claimed = sqlx::query(
        r#"
        SELECT id, user_id, file_key, source_url, options
        FROM tasks
        WHERE status = 'queued' AND deleted_at IS NULL
        ORDER BY created_at
        FOR UPDATE SKIP LOCKED
        LIMIT 1
        "#,
    )
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = claimed else {
        tx.commit().await?;
        return Ok(());
    };

    let task_id: Uuid = row.try_get("id")?;
    let user_id: Uuid = row.try_get("user_id")?;
    let file_key: Option<String> = row.try_get("file_key")?;
    let source_url: Option<String> = row.try_get("source_url")?;
    let options: serde_json::Value = row.try_get("options")?;

    sqlx::query("UPDATE tasks SET status = 'processing', stage = 'transcribing' WHERE id = $1")
        .bind(task_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let variant = options
        .get("asr_variant")
        .and_then(|v| v.as_str())
        .unwrap_or("default")
        .to_string();
    let audio_ref = AudioReference(file_key.or(source_url).unwrap_or_default());

    // Pre-check already pins a provider for every non-admin task; an admin
    // task created without a pin reaches here with no `asr_provider` option,
    // so the worker consults the scheduler itself before execution.
    let provider_name = match options.get("asr_provider").and_then(|v| v.as_str()) {
        Some(name) => name.to_string(),
        None => {
            let schedule_req = ScheduleRequest {
                user: Some(user_id),
                variant: variant.clone(),
                preferred_providers: None,
                weights: None,
                task_features: TaskFeatures {
                    diarization: options
                        .get("enable_speaker_diarization")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                    word_level: options
                        .get("word_level")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                },
            };
            match scheduler.select(&schedule_req, OffsetDateTime::now_utc()).await? {
                Some(name) => name,
                None => {
                    let err = voxledger_asr::AsrError::AllAsrProvidersExhausted;
                    return fail_task(pool, settlement, task_id, user_id, "unassigned", &variant, 1, &err).await;
                }
            }
        }
    };

    let attempt = 1;
    match registry.get(&provider_name) {
        Some(provider) => match provider.transcribe(&audio_ref).await {
            Ok((segments, measured_duration)) => {
                settlement
                    .settle_success(SettleSuccess {
                        user_id,
                        task_id: Some(task_id),
                        attempt,
                        provider: &provider_name,
                        variant: &variant,
                        measured_duration,
                        external_task_id: None,
                        processing_time_ms: None,
                    })
                    .await?;
                sqlx::query(
                    "UPDATE tasks SET status = 'completed', stage = 'done', progress = 100 WHERE id = $1",
                )
                .bind(task_id)
                .execute(pool)
                .await?;
                tracing::info!(task_id = %task_id, segments = segments.len(), "task completed");
            }
            Err(err) => fail_task(pool, settlement, task_id, user_id, &provider_name, &variant, attempt, &err).await?,
        },
        None => {
            let err = voxledger_asr::AsrError::AsrProviderNotRegistered(provider_name.clone());
            fail_task(pool, settlement, task_id, user_id, &provider_name, &variant, attempt, &err).await?
        }
    }

    Ok(())
}

async fn fail_task(
    pool: &sqlx::PgPool,
    settlement: &Settlement,
    task_id: Uuid,
    user_id: Uuid,
    provider: &str,
    variant: &str,
    attempt: i32,
    err: &voxledger_asr::AsrError,
) -> anyhow::Result<()> {
    settlement
        .settle_failure(SettleFailure {
            user_id,
            task_id: Some(task_id),
            attempt,
            provider,
            variant,
            error_code: "asr_service_failed",
            error_message: &err.to_string(),
            processing_time_ms: None,
        })
        .await?;
    sqlx::query("UPDATE tasks SET status = 'failed', error_code = $1 WHERE id = $2")
        .bind("asr_service_failed")
        .bind(task_id)
        .execute(pool)
        .await?;
    tracing::warn!(task_id = %task_id, error = %err, "task failed");
    Ok(())
}

/// Tasks stuck in `processing` for longer than an hour are treated as
/// abandoned (worker crashed mid-run) and reset to `queued` for retry.
async fn requeue_stuck_tasks(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let reset = sqlx::query(
        r#"
        UPDATE tasks
        SET status = 'queued', stage = 'queued', retry_count = retry_count + 1
        WHERE status = 'processing'
          AND created_at < now() - interval '1 hour'
        "#,
    )
    .execute(pool)
    .await?;

    if reset.rows_affected() > 0 {
        tracing::info!(count = reset.rows_affected(), "requeued stuck tasks");
    }
    Ok(())
}
