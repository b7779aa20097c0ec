//! Field-level record comparator.
//!
//! Decides whether a current row and its staging counterpart represent the
//! same logical state. Pure: given two rows sharing a natural identifier and
//! the set of volatile column names, it returns the map of column → new value
//! for every non-ignored column whose value differs. An empty map means the
//! record is unchanged and stays untouched in the current table.

use anyhow::{bail, Result};
use std::collections::BTreeSet;

use crate::models::RowValues;

/// Compute the field-level differences between a current row and its staging
/// counterpart, skipping `ignored` columns.
///
/// Values use plain equality; a populated value going missing (`Some` →
/// `None`) is a difference like any other. The non-ignored column universes
/// of the two rows must align exactly — a mismatch is a configuration error,
/// not a difference, and fails fast before any row is touched.
pub fn diff_fields(
    current: &RowValues,
    staging: &RowValues,
    ignored: &[&str],
) -> Result<RowValues> {
    let current_cols: BTreeSet<&str> = current
        .keys()
        .map(String::as_str)
        .filter(|c| !ignored.contains(c))
        .collect();
    let staging_cols: BTreeSet<&str> = staging
        .keys()
        .map(String::as_str)
        .filter(|c| !ignored.contains(c))
        .collect();

    if current_cols != staging_cols {
        let missing: Vec<_> = current_cols.difference(&staging_cols).collect();
        let unexpected: Vec<_> = staging_cols.difference(&current_cols).collect();
        bail!(
            "comparison column universes misaligned (staging missing {:?}, staging extra {:?})",
            missing,
            unexpected
        );
    }

    let mut diffs = RowValues::new();
    for column in current_cols {
        let old = current.get(column).cloned().flatten();
        let new = staging.get(column).cloned().flatten();
        if old != new {
            diffs.insert(column.to_string(), new);
        }
    }

    Ok(diffs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Option<&str>)]) -> RowValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(|s| s.to_string())))
            .collect()
    }

    #[test]
    fn test_identical_rows_no_diff() {
        let a = row(&[("naid", Some("1")), ("title", Some("X"))]);
        let diffs = diff_fields(&a, &a.clone(), &[]).unwrap();
        assert!(diffs.is_empty());
    }

    #[test]
    fn test_changed_value_detected() {
        let current = row(&[("naid", Some("1")), ("title", Some("X"))]);
        let staging = row(&[("naid", Some("1")), ("title", Some("Z"))]);
        let diffs = diff_fields(&current, &staging, &[]).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs.get("title"), Some(&Some("Z".to_string())));
    }

    #[test]
    fn test_value_going_missing_is_a_difference() {
        let current = row(&[("naid", Some("1")), ("title", Some("X"))]);
        let staging = row(&[("naid", Some("1")), ("title", None)]);
        let diffs = diff_fields(&current, &staging, &[]).unwrap();
        assert_eq!(diffs.get("title"), Some(&None));
    }

    #[test]
    fn test_ignored_column_excluded() {
        let current = row(&[("naid", Some("1")), ("scrape_timestamp", Some("t1"))]);
        let staging = row(&[("naid", Some("1")), ("scrape_timestamp", Some("t2"))]);
        let diffs = diff_fields(&current, &staging, &["scrape_timestamp"]).unwrap();
        assert!(diffs.is_empty());
    }

    #[test]
    fn test_misaligned_universe_fails() {
        let current = row(&[("naid", Some("1")), ("title", Some("X"))]);
        let staging = row(&[("naid", Some("1")), ("label", Some("X"))]);
        let err = diff_fields(&current, &staging, &[]).unwrap_err();
        assert!(err.to_string().contains("misaligned"));
    }

    #[test]
    fn test_ignored_column_may_be_absent_on_either_side() {
        let current = row(&[("naid", Some("1")), ("scrape_timestamp", Some("t1"))]);
        let staging = row(&[("naid", Some("1"))]);
        let diffs = diff_fields(&current, &staging, &["scrape_timestamp"]).unwrap();
        assert!(diffs.is_empty());
    }
}
