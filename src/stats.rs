//! Database status overview.
//!
//! Provides a quick summary of the reconciliation state: row counts for the
//! current, staging, and history table of each entity kind, plus the most
//! recent load. Used by `catsync status` to confirm loads and reconcile runs
//! are behaving as expected.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::schema;

/// Run the status command: query the database and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("catalog-sync — Database Status");
    println!("==============================");
    println!();
    println!("  Database: {}", config.db.path.display());
    println!("  Size:     {}", format_bytes(db_size));
    println!();
    println!(
        "  {:<12} {:>9} {:>9} {:>9}",
        "TABLE", "CURRENT", "STAGING", "HISTORY"
    );
    println!("  {}", "-".repeat(44));

    for spec in schema::all_specs() {
        let current = count(&pool, spec.current_table).await?;
        let staging = count(&pool, spec.staging_table).await?;
        let history = count(&pool, spec.history_table).await?;
        println!(
            "  {:<12} {:>9} {:>9} {:>9}",
            spec.name, current, staging, history
        );
    }

    let last_load = sqlx::query(
        "SELECT loaded_at, snapshot_sha256, records_staged, objects_staged, records_skipped \
         FROM load_runs ORDER BY loaded_at DESC LIMIT 1",
    )
    .fetch_optional(&pool)
    .await?;

    println!();
    match last_load {
        Some(row) => {
            let loaded_at: String = row.get("loaded_at");
            let sha: String = row.get("snapshot_sha256");
            let records: i64 = row.get("records_staged");
            let objects: i64 = row.get("objects_staged");
            let skipped: i64 = row.get("records_skipped");
            println!("  Last load: {}", format_relative(&loaded_at));
            println!(
                "    staged {} record(s), {} object(s), skipped {}",
                records, objects, skipped
            );
            println!("    snapshot sha256: {}", sha);
        }
        None => println!("  Last load: never"),
    }
    println!();

    pool.close().await;
    Ok(())
}

async fn count(pool: &SqlitePool, table: &str) -> Result<i64> {
    let n = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await?;
    Ok(n)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format an RFC 3339 timestamp as a relative time string (e.g. "3 hours ago").
fn format_relative(rfc3339: &str) -> String {
    let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(rfc3339) else {
        return rfc3339.to_string();
    };
    let delta = chrono::Utc::now().timestamp() - parsed.timestamp();

    if delta < 0 {
        return rfc3339.to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        rfc3339.to_string()
    }
}
