//! Snapshot reconciliation engine.
//!
//! Given a freshly loaded staging set and the persisted current table, runs
//! three phases in strict order for each entity kind:
//!
//! 1. **Insert-New** — staging identifiers absent from current are inserted.
//! 2. **Archive-Removed** — current identifiers absent from staging are moved
//!    into history (tagged with the run timestamp and, where the kind carries
//!    a removal flag, "fully removed") and deleted from current.
//! 3. **Diff-and-Replace** — identifiers present in both are compared
//!    field-by-field; changed rows are archived, deleted, and replaced with
//!    the staging version.
//!
//! Every history row written by one run carries the same timestamp, taken at
//! run start, so rows that changed together can be traced together later.
//!
//! Row-level failures are isolated: the offending identifier is logged,
//! counted in the outcome, and skipped; the phase continues. Archive+delete
//! (+reinsert) for a single identifier always commit in one transaction, so
//! a crash leaves a prefix of identifiers fully processed and the rest
//! untouched — never a row that is gone from current without a history entry.
//!
//! The engine assumes single-writer access for the duration of a run.
//! Overlapping runs against the same database are not supported; scheduling
//! must serialize them externally.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::compare;
use crate::config::Config;
use crate::db;
use crate::models::{RowValues, RunOutcome, TableOutcome};
use crate::schema::{self, TableSpec, HISTORY_TIMESTAMP};

/// CLI entry point: run the engine over both entity kinds and print a summary.
pub async fn run_reconcile(config: &Config, dry_run: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = reconcile_all(&pool, dry_run).await;
    pool.close().await;
    let outcome = result?;

    if outcome.dry_run {
        println!("reconcile (dry-run)");
    } else {
        println!("reconcile");
    }
    println!("  run: {}", outcome.run_id);
    println!("  timestamp: {}", outcome.run_timestamp.to_rfc3339());
    for table in &outcome.tables {
        println!("  {}:", table.table);
        println!("    inserted: {}", table.inserted);
        println!("    removed: {}", table.removed);
        println!("    replaced: {}", table.replaced);
        println!("    unchanged: {}", table.unchanged);
        if table.row_errors > 0 {
            println!("    row errors: {}", table.row_errors);
        }
    }
    let errors = outcome.total_row_errors();
    if errors > 0 {
        println!("completed with {} row error(s)", errors);
    } else {
        println!("ok");
    }
    Ok(())
}

/// Run one full reconciliation over both entity kinds.
///
/// Table layouts are validated up front; a mismatch aborts before any
/// mutation. Returns the per-table counts for the run.
pub async fn reconcile_all(pool: &SqlitePool, dry_run: bool) -> Result<RunOutcome> {
    let run_timestamp = Utc::now();
    let run_id = Uuid::new_v4().to_string();

    for spec in schema::all_specs() {
        schema::validate_layout(pool, spec)
            .await
            .with_context(|| format!("validating layout for '{}'", spec.name))?;
    }

    let mut tables = Vec::new();
    for spec in schema::all_specs() {
        let outcome = reconcile_table(pool, spec, run_timestamp, dry_run)
            .await
            .with_context(|| format!("reconciling '{}'", spec.name))?;
        tables.push(outcome);
    }

    Ok(RunOutcome {
        run_id,
        run_timestamp,
        dry_run,
        tables,
    })
}

/// Run the three phases for one entity kind.
pub async fn reconcile_table(
    pool: &SqlitePool,
    spec: &TableSpec,
    run_timestamp: DateTime<Utc>,
    dry_run: bool,
) -> Result<TableOutcome> {
    let mut outcome = TableOutcome {
        table: spec.name.to_string(),
        ..Default::default()
    };

    let staging_rows: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", spec.staging_table))
            .fetch_one(pool)
            .await?;
    let current_rows: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", spec.current_table))
            .fetch_one(pool)
            .await?;
    if staging_rows == 0 && current_rows > 0 {
        warn!(
            table = spec.name,
            current_rows,
            "staging set is empty; every current row will be archived as removed"
        );
    }

    // Identifiers present in both sets are snapshotted before Insert-New
    // runs, so rows inserted this run are not re-compared against their own
    // staging version and counted as unchanged.
    let common = fetch_common_rows(pool, spec).await?;

    insert_new(pool, spec, dry_run, &mut outcome).await?;
    archive_removed(pool, spec, run_timestamp, dry_run, &mut outcome).await?;
    diff_and_replace(pool, spec, common, run_timestamp, dry_run, &mut outcome).await?;

    debug!(
        table = spec.name,
        inserted = outcome.inserted,
        removed = outcome.removed,
        replaced = outcome.replaced,
        unchanged = outcome.unchanged,
        row_errors = outcome.row_errors,
        "table reconciled"
    );
    Ok(outcome)
}

/// Phase 1: insert every staging identifier not already in current.
async fn insert_new(
    pool: &SqlitePool,
    spec: &TableSpec,
    dry_run: bool,
    outcome: &mut TableOutcome,
) -> Result<()> {
    let keys: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT DISTINCT t.{tkey} FROM {staging} t \
         WHERE t.{tkey} IS NOT NULL \
         AND NOT EXISTS (SELECT 1 FROM {current} m WHERE m.{key} = t.{tkey})",
        tkey = spec.staged_key(),
        staging = spec.staging_table,
        current = spec.current_table,
        key = spec.key_column,
    ))
    .fetch_all(pool)
    .await?;

    if dry_run {
        outcome.inserted = keys.len() as u64;
        return Ok(());
    }

    let columns = spec.columns.join(", ");
    let staged_columns = spec
        .columns
        .iter()
        .map(|c| spec.staged(c))
        .collect::<Vec<_>>()
        .join(", ");
    let insert = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} WHERE {} = ?",
        spec.current_table,
        columns,
        staged_columns,
        spec.staging_table,
        spec.staged_key()
    );

    for key in keys {
        match sqlx::query(&insert).bind(&key).execute(pool).await {
            Ok(_) => outcome.inserted += 1,
            Err(e) => {
                warn!(table = spec.name, key = %key, error = %e, "insert-new failed; skipping identifier");
                outcome.row_errors += 1;
            }
        }
    }
    Ok(())
}

/// Phase 2: move every current identifier absent from staging into history.
///
/// The removal set is computed once, before any row moves, so membership is
/// decided against a stable view of staging.
async fn archive_removed(
    pool: &SqlitePool,
    spec: &TableSpec,
    run_timestamp: DateTime<Utc>,
    dry_run: bool,
    outcome: &mut TableOutcome,
) -> Result<()> {
    let keys: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT m.{key} FROM {current} m \
         WHERE NOT EXISTS (SELECT 1 FROM {staging} t WHERE t.{tkey} = m.{key})",
        key = spec.key_column,
        current = spec.current_table,
        staging = spec.staging_table,
        tkey = spec.staged_key(),
    ))
    .fetch_all(pool)
    .await?;

    if dry_run {
        outcome.removed = keys.len() as u64;
        return Ok(());
    }

    let timestamp = run_timestamp.to_rfc3339();
    for key in keys {
        match move_to_history(pool, spec, &key, &timestamp, true, false).await {
            Ok(()) => outcome.removed += 1,
            Err(e) => {
                warn!(table = spec.name, key = %key, error = %e, "archive-removed failed; skipping identifier");
                outcome.row_errors += 1;
            }
        }
    }
    Ok(())
}

/// Phase 3: compare every identifier that was present in both sets at run
/// start and replace the current row where any non-ignored field differs.
async fn diff_and_replace(
    pool: &SqlitePool,
    spec: &TableSpec,
    rows: Vec<(String, RowValues, RowValues)>,
    run_timestamp: DateTime<Utc>,
    dry_run: bool,
    outcome: &mut TableOutcome,
) -> Result<()> {
    let timestamp = run_timestamp.to_rfc3339();

    for (key, current, staging) in rows {
        // A universe mismatch here is a configuration error, not a row
        // error: propagate and abort the run.
        let diffs = compare::diff_fields(&current, &staging, spec.ignored_columns)
            .with_context(|| format!("comparing identifier {}", key))?;

        if diffs.is_empty() {
            outcome.unchanged += 1;
            continue;
        }

        if dry_run {
            outcome.replaced += 1;
            continue;
        }

        match move_to_history(pool, spec, &key, &timestamp, false, true).await {
            Ok(()) => {
                debug!(table = spec.name, key = %key, changed = diffs.len(), "replaced identifier");
                outcome.replaced += 1;
            }
            Err(e) => {
                warn!(table = spec.name, key = %key, error = %e, "diff-and-replace failed; skipping identifier");
                outcome.row_errors += 1;
            }
        }
    }
    Ok(())
}

/// Archive one current row into history and delete it from current, in a
/// single transaction. With `reinsert` the staging version is inserted into
/// current before committing, so a changed identifier is never observable as
/// deleted-without-replacement.
async fn move_to_history(
    pool: &SqlitePool,
    spec: &TableSpec,
    key: &str,
    timestamp: &str,
    fully_removed: bool,
    reinsert: bool,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let columns = spec.columns.join(", ");
    let (history_columns, history_select) = match spec.removal_flag_column {
        Some(flag) => (
            format!("{}, {}, {}", columns, HISTORY_TIMESTAMP, flag),
            format!("{}, ?, ?", columns),
        ),
        None => (
            format!("{}, {}", columns, HISTORY_TIMESTAMP),
            format!("{}, ?", columns),
        ),
    };

    let insert_history = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} WHERE {} = ?",
        spec.history_table, history_columns, history_select, spec.current_table, spec.key_column
    );
    let mut query = sqlx::query(&insert_history).bind(timestamp);
    if spec.removal_flag_column.is_some() {
        query = query.bind(if fully_removed { 1i64 } else { 0i64 });
    }
    let archived = query.bind(key).execute(&mut *tx).await?;
    if archived.rows_affected() != 1 {
        bail!(
            "expected exactly one current row for identifier {} (found {})",
            key,
            archived.rows_affected()
        );
    }

    sqlx::query(&format!(
        "DELETE FROM {} WHERE {} = ?",
        spec.current_table, spec.key_column
    ))
    .bind(key)
    .execute(&mut *tx)
    .await?;

    if reinsert {
        let staged_columns = spec
            .columns
            .iter()
            .map(|c| spec.staged(c))
            .collect::<Vec<_>>()
            .join(", ");
        let inserted = sqlx::query(&format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} WHERE {} = ?",
            spec.current_table,
            columns,
            staged_columns,
            spec.staging_table,
            spec.staged_key()
        ))
        .bind(key)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            bail!("staging row for identifier {} vanished mid-run", key);
        }
    }

    tx.commit().await?;
    Ok(())
}

/// Fetch the full column universe for every identifier present in both
/// current and staging, as (key, current values, staging values).
async fn fetch_common_rows(
    pool: &SqlitePool,
    spec: &TableSpec,
) -> Result<Vec<(String, RowValues, RowValues)>> {
    let mut select = vec![format!("m.{}", spec.key_column)];
    for column in spec.columns {
        select.push(format!("m.{}", column));
    }
    for column in spec.columns {
        select.push(format!("t.{}", spec.staged(column)));
    }
    let sql = format!(
        "SELECT {} FROM {} m JOIN {} t ON t.{} = m.{}",
        select.join(", "),
        spec.current_table,
        spec.staging_table,
        spec.staged_key(),
        spec.key_column
    );

    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    let width = spec.columns.len();

    let mut result = Vec::with_capacity(rows.len());
    for row in &rows {
        let key: String = row.try_get(0)?;
        let mut current = RowValues::new();
        let mut staging = RowValues::new();
        for (i, column) in spec.columns.iter().enumerate() {
            current.insert(column.to_string(), row.try_get::<Option<String>, _>(1 + i)?);
            staging.insert(
                column.to_string(),
                row.try_get::<Option<String>, _>(1 + width + i)?,
            );
        }
        result.push((key, current, staging));
    }
    Ok(result)
}
