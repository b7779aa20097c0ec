//! Core data models used throughout catalog-sync.
//!
//! These types represent the staged records flowing out of the snapshot
//! loader and the structured outcome reported by the reconciliation engine.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Column values for a single row, keyed by unprefixed column name.
///
/// `None` means SQL NULL. The comparator treats `None` vs `Some` as a real
/// difference — a value that used to be populated and is now missing counts
/// as a change.
pub type RowValues = BTreeMap<String, Option<String>>;

/// One catalog description record extracted from a snapshot payload.
#[derive(Debug, Clone, Default)]
pub struct CatalogRecord {
    pub naid: String,
    pub title: String,
    pub level_of_description: String,
    pub parent_series_naid: Option<String>,
    pub parent_series_title: Option<String>,
    pub parent_file_unit_naid: Option<String>,
    pub parent_file_unit_title: Option<String>,
    pub creator: String,
    pub inclusive_start_date: String,
    pub inclusive_end_date: String,
    pub coverage_start_date: String,
    pub coverage_end_date: String,
    pub ldr_count: String,
    pub series_extents: String,
    pub access_restriction_status: String,
    pub specific_access_restrictions: String,
    pub accession_numbers: String,
    pub disposition_authority_numbers: String,
    pub crccrca_number: String,
    pub scope_and_content_note: String,
    pub function_and_use_note: String,
    pub general_notes: String,
}

/// One digital object attached to a catalog record in the snapshot.
#[derive(Debug, Clone)]
pub struct DigitalObject {
    pub digital_object_url: Option<String>,
    pub digital_object_id: Option<String>,
}

/// A catalog record together with its digital objects, ready for staging.
#[derive(Debug, Clone)]
pub struct StagedDescription {
    pub record: CatalogRecord,
    pub objects: Vec<DigitalObject>,
}

/// Per-table counts produced by one reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct TableOutcome {
    pub table: String,
    /// Staging identifiers not previously in the current table.
    pub inserted: u64,
    /// Current identifiers absent from staging, moved to history.
    pub removed: u64,
    /// Identifiers present in both whose field values differed.
    pub replaced: u64,
    /// Identifiers present in both with no detected difference.
    pub unchanged: u64,
    /// Rows skipped after an isolated row-level failure.
    pub row_errors: u64,
}

/// Structured result of a full reconciliation run across both entity kinds.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    /// Single timestamp shared by every history row this run writes.
    pub run_timestamp: DateTime<Utc>,
    pub dry_run: bool,
    pub tables: Vec<TableOutcome>,
}

impl RunOutcome {
    pub fn total_row_errors(&self) -> u64 {
        self.tables.iter().map(|t| t.row_errors).sum()
    }
}

/// Summary of one `load` invocation.
#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub loaded_at: DateTime<Utc>,
    pub snapshot_sha256: String,
    pub records_staged: u64,
    pub objects_staged: u64,
    pub records_skipped: u64,
}
