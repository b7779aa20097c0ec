//! Table layout declarations for the two reconciled entity kinds.
//!
//! A [`TableSpec`] is the static configuration surface the engine runs
//! against: the three table names (current, staging, history), the natural
//! key column, the full ordered column universe, and the volatile columns
//! excluded from change detection. Staging tables carry the same columns
//! under the `temp_` prefix; history tables carry the current columns plus
//! `history_timestamp` and, for the object-URL kind, a `deleted_from_current`
//! flag distinguishing full removal from replacement.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;

/// History metadata column present on every history table.
pub const HISTORY_TIMESTAMP: &str = "history_timestamp";

/// Static layout description for one reconciled entity kind.
#[derive(Debug, Clone)]
pub struct TableSpec {
    /// Logical name used in logs and run summaries.
    pub name: &'static str,
    pub current_table: &'static str,
    pub staging_table: &'static str,
    pub history_table: &'static str,
    /// Prefix staging columns carry relative to current columns.
    pub staging_prefix: &'static str,
    /// Natural identifier column; unique within the current table.
    pub key_column: &'static str,
    /// Full ordered column universe, key column included.
    pub columns: &'static [&'static str],
    /// Volatile columns excluded from change detection.
    pub ignored_columns: &'static [&'static str],
    /// History flag column: 1 when the identifier left the snapshot
    /// entirely, 0 when it was replaced by a newer version. Only the
    /// object-URL kind carries this.
    pub removal_flag_column: Option<&'static str>,
}

impl TableSpec {
    /// The staging-side name of a current column.
    pub fn staged(&self, column: &str) -> String {
        format!("{}{}", self.staging_prefix, column)
    }

    /// The staging-side name of the key column.
    pub fn staged_key(&self) -> String {
        self.staged(self.key_column)
    }
}

/// Catalog description records, keyed by `naid`.
pub const CATALOG: TableSpec = TableSpec {
    name: "catalog",
    current_table: "catalog",
    staging_table: "catalog_temp",
    history_table: "catalog_history",
    staging_prefix: "temp_",
    key_column: "naid",
    columns: &[
        "naid",
        "title",
        "level_of_description",
        "parent_series_naid",
        "parent_series_title",
        "parent_file_unit_naid",
        "parent_file_unit_title",
        "creator",
        "inclusive_start_date",
        "inclusive_end_date",
        "coverage_start_date",
        "coverage_end_date",
        "ldr_count",
        "series_extents",
        "access_restriction_status",
        "specific_access_restrictions",
        "accession_numbers",
        "disposition_authority_numbers",
        "crccrca_number",
        "scope_and_content_note",
        "function_and_use_note",
        "general_notes",
        "scrape_timestamp",
    ],
    ignored_columns: &[
        "inclusive_start_date",
        "inclusive_end_date",
        "coverage_start_date",
        "coverage_end_date",
        "scrape_timestamp",
    ],
    removal_flag_column: None,
};

/// Digital object URL records, keyed by `digital_object_id`.
pub const OBJECT_URL: TableSpec = TableSpec {
    name: "object_url",
    current_table: "object_url",
    staging_table: "object_url_temp",
    history_table: "object_url_history",
    staging_prefix: "temp_",
    key_column: "digital_object_id",
    columns: &[
        "naid",
        "digital_object_url",
        "digital_object_id",
        "scrape_timestamp",
    ],
    ignored_columns: &["scrape_timestamp"],
    removal_flag_column: Some("deleted_from_current"),
};

/// Both entity kinds, in the order the engine processes them.
pub fn all_specs() -> [&'static TableSpec; 2] {
    [&CATALOG, &OBJECT_URL]
}

/// Verify that the persisted tables match the declared layout.
///
/// Runs before any phase mutates anything: a misaligned column universe
/// between current and staging would silently skip columns during change
/// detection, so a mismatch aborts the whole run instead.
pub async fn validate_layout(pool: &SqlitePool, spec: &TableSpec) -> Result<()> {
    let expected_current: BTreeSet<String> =
        spec.columns.iter().map(|c| c.to_string()).collect();
    check_table(pool, spec.current_table, &expected_current).await?;

    let expected_staging: BTreeSet<String> =
        spec.columns.iter().map(|c| spec.staged(c)).collect();
    check_table(pool, spec.staging_table, &expected_staging).await?;

    let mut expected_history = expected_current.clone();
    expected_history.insert(HISTORY_TIMESTAMP.to_string());
    if let Some(flag) = spec.removal_flag_column {
        expected_history.insert(flag.to_string());
    }
    check_table(pool, spec.history_table, &expected_history).await?;

    Ok(())
}

async fn check_table(
    pool: &SqlitePool,
    table: &str,
    expected: &BTreeSet<String>,
) -> Result<()> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(pool)
        .await?;

    if rows.is_empty() {
        bail!("table '{}' does not exist; run `catsync init` first", table);
    }

    let actual: BTreeSet<String> = rows
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();

    if &actual != expected {
        let missing: Vec<_> = expected.difference(&actual).cloned().collect();
        let unexpected: Vec<_> = actual.difference(expected).cloned().collect();
        bail!(
            "table '{}' layout mismatch (missing: [{}], unexpected: [{}])",
            table,
            missing.join(", "),
            unexpected.join(", ")
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_column_is_in_universe() {
        for spec in all_specs() {
            assert!(spec.columns.contains(&spec.key_column));
        }
    }

    #[test]
    fn test_ignored_columns_are_subset_of_universe() {
        for spec in all_specs() {
            for ignored in spec.ignored_columns {
                assert!(
                    spec.columns.contains(ignored),
                    "{} ignores unknown column {}",
                    spec.name,
                    ignored
                );
            }
        }
    }

    #[test]
    fn test_key_column_is_never_ignored() {
        for spec in all_specs() {
            assert!(!spec.ignored_columns.contains(&spec.key_column));
        }
    }

    #[test]
    fn test_staged_name_uses_prefix() {
        assert_eq!(CATALOG.staged("title"), "temp_title");
        assert_eq!(OBJECT_URL.staged_key(), "temp_digital_object_id");
    }
}
