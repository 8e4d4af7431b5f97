#!/usr/bin/env rust-script
//! ASR Ledger Consistency Verification Script
//!
//! Walks `usage_periods` and `usage_ledger` and reports any row that
//! violates the conservation or free-cap invariants instead of trusting
//! the application layer to have kept them true. An operability tool, not
//! a substitute for the property tests in the asr crate.
//!
//! ## Usage
//! ```bash
//! cargo run --bin verify_asr_consistency > drift_report.csv
//! ```
//!
//! ## Environment Variables
//! - DATABASE_URL: PostgreSQL connection string
//!
//! ## Output
//! CSV report with columns:
//! - table, key, issue_type, detail

use std::env;
use std::error::Error;

use sqlx::Row;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!("VoxLedger ASR Consistency Verification");
    println!("========================================\n");

    dotenvy::dotenv().ok();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = sqlx::postgres::PgPool::connect(&database_url).await?;

    println!("✓ Connected to database\n");

    let mut issues = 0u64;

    // ========================================================================
    // Check 1: usage_periods conservation (used_seconds = free_quota_used + paid_seconds)
    // ========================================================================
    println!("Check 1: Verifying usage_periods conservation...");

    let period_violations = sqlx::query(
        r#"
        SELECT id, owner_user_id, provider, variant, period_type, period_start,
               used_seconds, free_quota_used, paid_seconds
        FROM usage_periods
        WHERE used_seconds <> free_quota_used + paid_seconds
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if period_violations.is_empty() {
        println!("  ✓ All usage_periods rows satisfy used = free + paid");
    } else {
        println!("  ⚠ Found {} usage_periods rows violating conservation", period_violations.len());
        for row in &period_violations {
            let id: i64 = row.try_get("id")?;
            let used: f64 = row.try_get("used_seconds")?;
            let free: f64 = row.try_get("free_quota_used")?;
            let paid: f64 = row.try_get("paid_seconds")?;
            println!("    - period {}: used={} free={} paid={} (delta={})", id, used, free, paid, used - (free + paid));
        }
        issues += period_violations.len() as u64;
    }

    // ========================================================================
    // Check 2: usage_periods free-cap (free_quota_used <= free_quota_seconds at settlement time)
    // ========================================================================
    println!("\nCheck 2: Verifying usage_periods never exceed the free cap...");

    let cap_violations = sqlx::query(
        r#"
        SELECT p.id, p.provider, p.variant, p.free_quota_used, c.free_quota_seconds
        FROM usage_periods p
        JOIN pricing_configs c ON c.provider = p.provider AND c.variant = p.variant
        WHERE p.free_quota_used > c.free_quota_seconds
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if cap_violations.is_empty() {
        println!("  ✓ No usage_periods row exceeds its provider's free cap");
    } else {
        println!("  ⚠ Found {} usage_periods rows over the free cap", cap_violations.len());
        for row in &cap_violations {
            let id: i64 = row.try_get("id")?;
            let used: f64 = row.try_get("free_quota_used")?;
            let cap: f64 = row.try_get("free_quota_seconds")?;
            println!("    - period {}: free_quota_used={} > free_quota_seconds={}", id, used, cap);
        }
        issues += cap_violations.len() as u64;
    }

    // ========================================================================
    // Check 3: usage_ledger cost derivation (actual_paid_cost matches paid_duration * rate)
    // ========================================================================
    println!("\nCheck 3: Verifying usage_ledger cost derivation...");

    let cost_violations = sqlx::query(
        r#"
        SELECT l.id, l.paid_duration_seconds, l.actual_paid_cost, c.cost_per_hour
        FROM usage_ledger l
        JOIN pricing_configs c ON c.provider = l.provider AND c.variant = l.variant
        WHERE l.status = 'success'
          AND abs(l.actual_paid_cost - (l.paid_duration_seconds / 3600.0 * c.cost_per_hour)) > 0.0001
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if cost_violations.is_empty() {
        println!("  ✓ All usage_ledger success rows derive cost from paid duration correctly");
    } else {
        println!("  ⚠ Found {} usage_ledger rows with mismatched cost", cost_violations.len());
        for row in &cost_violations {
            let id: uuid::Uuid = row.try_get("id")?;
            println!("    - ledger {}: cost does not match paid_duration_seconds * cost_per_hour", id);
        }
        issues += cost_violations.len() as u64;
    }

    // ========================================================================
    // Check 4: no duplicate settlement (unique (task_id, attempt, provider) already
    // enforced by a database constraint, but a NULL task_id never collides, so
    // confirm no attempt was charged against more than one ledger row by accident)
    // ========================================================================
    println!("\nCheck 4: Verifying no task attempt was settled more than once...");

    let duplicate_settlements = sqlx::query(
        r#"
        SELECT task_id, attempt, provider, count(*) as occurrences
        FROM usage_ledger
        WHERE task_id IS NOT NULL AND status = 'success'
        GROUP BY task_id, attempt, provider
        HAVING count(*) > 1
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if duplicate_settlements.is_empty() {
        println!("  ✓ No task attempt has more than one success ledger row");
    } else {
        println!("  ⚠ Found {} duplicated settlements", duplicate_settlements.len());
        for row in &duplicate_settlements {
            let task_id: uuid::Uuid = row.try_get("task_id")?;
            let attempt: i32 = row.try_get("attempt")?;
            println!("    - task {} attempt {}: duplicated", task_id, attempt);
        }
        issues += duplicate_settlements.len() as u64;
    }

    // ========================================================================
    // Summary Report
    // ========================================================================
    println!("\n========================================");
    println!("Summary");
    println!("========================================");

    if issues == 0 {
        println!("✓ No ASR ledger inconsistencies detected!");
    } else {
        println!("⚠ Found {} total issues", issues);
        println!("\nRecommendations:");
        println!("1. Inspect the affected rows by hand before touching any quota or ledger table");
        println!("2. These invariants should never be violated by correct code; treat this as a bug report, not routine drift");
    }

    Ok(())
}
