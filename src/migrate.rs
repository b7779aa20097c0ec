//! Idempotent schema creation.
//!
//! Builds the six entity tables (current, staging, and history for each of
//! the two reconciled kinds) from the declarations in [`crate::schema`], so
//! the persisted layout can never drift from what the engine validates
//! against. Entity columns are TEXT throughout; timestamps are stored as
//! RFC 3339 strings.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::schema::{self, TableSpec, HISTORY_TIMESTAMP};

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    for spec in schema::all_specs() {
        create_entity_tables(&pool, spec).await?;
    }

    // Audit trail of load invocations, one row per `catsync load`
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS load_runs (
            id TEXT PRIMARY KEY,
            loaded_at TEXT NOT NULL,
            snapshot_sha256 TEXT NOT NULL,
            records_staged INTEGER NOT NULL,
            objects_staged INTEGER NOT NULL,
            records_skipped INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}

async fn create_entity_tables(pool: &SqlitePool, spec: &TableSpec) -> Result<()> {
    // Current table: one row per live natural identifier
    let current_cols: Vec<String> = spec
        .columns
        .iter()
        .map(|c| {
            if *c == spec.key_column {
                format!("{} TEXT PRIMARY KEY", c)
            } else {
                format!("{} TEXT", c)
            }
        })
        .collect();
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        spec.current_table,
        current_cols.join(", ")
    ))
    .execute(pool)
    .await?;

    // Staging table: same universe under the temp_ prefix, no uniqueness
    // constraint — the loader replaces it wholesale each run
    let staging_cols: Vec<String> = spec
        .columns
        .iter()
        .map(|c| format!("{} TEXT", spec.staged(c)))
        .collect();
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        spec.staging_table,
        staging_cols.join(", ")
    ))
    .execute(pool)
    .await?;

    // History table: append-only, current columns plus metadata
    let mut history_cols: Vec<String> =
        spec.columns.iter().map(|c| format!("{} TEXT", c)).collect();
    history_cols.push(format!("{} TEXT NOT NULL", HISTORY_TIMESTAMP));
    if let Some(flag) = spec.removal_flag_column {
        history_cols.push(format!("{} INTEGER NOT NULL", flag));
    }
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        spec.history_table,
        history_cols.join(", ")
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {}({})",
        spec.staging_table,
        spec.key_column,
        spec.staging_table,
        spec.staged_key()
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {}({})",
        spec.history_table,
        spec.key_column,
        spec.history_table,
        spec.key_column
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{}_ts ON {}({})",
        spec.history_table, spec.history_table, HISTORY_TIMESTAMP
    ))
    .execute(pool)
    .await?;

    Ok(())
}
