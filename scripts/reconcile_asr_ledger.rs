#!/usr/bin/env rust-script
//! ASR Ledger Reconciliation Script
//!
//! The core never reconciles external provider invoices itself — it only
//! produces the per-call ledger that a separate reconciliation process
//! consumes (see usage_ledger's `reconciled`/`actual_cost` fields, written
//! only by that collaborator). This script is the local half of that
//! collaborator: it ingests an operator-supplied CSV of provider-reported
//! actual costs and applies them to matching ledger rows. It never calls
//! out to a provider billing API itself.
//!
//! ## Usage
//! ```bash
//! # Dry run (preview changes without applying)
//! cargo run --bin reconcile_asr_ledger -- actuals.csv --dry-run
//!
//! # Apply fixes
//! cargo run --bin reconcile_asr_ledger -- actuals.csv --apply
//! ```
//!
//! ## Input format
//! CSV with columns: ledger_id,actual_cost
//!
//! ## Environment Variables
//! - DATABASE_URL: PostgreSQL connection string
//!
//! ## Actions Performed
//! 1. For each (ledger_id, actual_cost) pair, load the matching success row
//! 2. Flag rows whose actual_cost diverges from actual_paid_cost by more
//!    than 1% for manual review instead of silently overwriting them
//! 3. Set actual_cost and reconciled = true on rows within tolerance

use std::env;
use std::error::Error;
use std::fs;

use uuid::Uuid;

struct ActualCost {
    ledger_id: Uuid,
    actual_cost: f64,
}

fn parse_actuals(path: &str) -> Result<Vec<ActualCost>, Box<dyn Error>> {
    let contents = fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        if line_no == 0 || line.trim().is_empty() {
            continue; // header or blank line
        }
        let mut parts = line.splitn(2, ',');
        let ledger_id: Uuid = parts
            .next()
            .ok_or("missing ledger_id column")?
            .trim()
            .parse()?;
        let actual_cost: f64 = parts
            .next()
            .ok_or("missing actual_cost column")?
            .trim()
            .parse()?;
        rows.push(ActualCost { ledger_id, actual_cost });
    }
    Ok(rows)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!("VoxLedger ASR Ledger Reconciliation");
    println!("=====================================\n");

    let args: Vec<String> = env::args().collect();
    let dry_run = !args.contains(&"--apply".to_string());
    let input_path = args
        .iter()
        .skip(1)
        .find(|a| !a.starts_with("--"))
        .ok_or("usage: reconcile_asr_ledger <actuals.csv> [--apply]")?;

    if dry_run {
        println!("🔍 DRY RUN MODE - No changes will be applied");
        println!("   Use --apply flag to execute changes\n");
    } else {
        println!("⚠️  LIVE MODE - Changes will be applied to the database\n");
    }

    dotenvy::dotenv().ok();
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = sqlx::postgres::PgPool::connect(&database_url).await?;

    println!("✓ Connected to database\n");

    let actuals = parse_actuals(input_path)?;
    println!("Loaded {} actual-cost rows from {}\n", actuals.len(), input_path);

    let mut to_apply = Vec::new();
    let mut flagged = Vec::new();

    for row in &actuals {
        let existing: Option<(f64, bool)> = sqlx::query_as(
            r#"
            SELECT actual_paid_cost, reconciled
            FROM usage_ledger
            WHERE id = $1 AND status = 'success'
            "#,
        )
        .bind(row.ledger_id)
        .fetch_optional(&pool)
        .await?;

        let Some((actual_paid_cost, already_reconciled)) = existing else {
            println!("  ⚠ ledger {} not found (or not a success row), skipping", row.ledger_id);
            continue;
        };

        if already_reconciled {
            println!("  - ledger {} already reconciled, skipping", row.ledger_id);
            continue;
        }

        let divergence = if actual_paid_cost.abs() > f64::EPSILON {
            (row.actual_cost - actual_paid_cost).abs() / actual_paid_cost.abs()
        } else {
            row.actual_cost.abs()
        };

        if divergence > 0.01 {
            flagged.push((row.ledger_id, actual_paid_cost, row.actual_cost, divergence));
        } else {
            to_apply.push(row);
        }
    }

    println!("\n{} rows within tolerance, {} rows flagged for manual review", to_apply.len(), flagged.len());

    if !flagged.is_empty() {
        println!("\nFlagged (divergence > 1%):");
        for (id, computed, reported, divergence) in &flagged {
            println!(
                "  - ledger {}: computed={:.4} reported={:.4} divergence={:.1}%",
                id, computed, reported, divergence * 100.0
            );
        }
    }

    if dry_run {
        println!("\nThis was a dry run. No changes were applied.");
        println!("Run with --apply to write {} rows.", to_apply.len());
        return Ok(());
    }

    for row in &to_apply {
        sqlx::query(
            r#"
            UPDATE usage_ledger
            SET actual_cost = $1, reconciled = true
            WHERE id = $2
            "#,
        )
        .bind(row.actual_cost)
        .bind(row.ledger_id)
        .execute(&pool)
        .await?;
    }

    println!("\n✓ Reconciled {} ledger rows", to_apply.len());
    Ok(())
}
