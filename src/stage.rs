//! Staging loader and cleanup.
//!
//! The loader plays the "external loader" role of the pipeline: it parses an
//! already-fetched catalog API response from a local JSON file, extracts one
//! staging row per description record plus one per attached digital object,
//! and writes them to the staging tables. It performs no network I/O.
//!
//! Every staged row from one load shares a single `scrape_timestamp`. A bad
//! record is skipped (its digital objects with it) and counted; the load
//! continues. Each `load` is recorded in `load_runs` with a SHA-256 of the
//! snapshot file.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::models::{CatalogRecord, DigitalObject, LoadSummary, StagedDescription};
use crate::schema;

/// Note text marking a CRCCRCA request number among variant control numbers.
const CRCCRCA_NOTE: &str = "Civil Rights Cold Case Records Collection Act Request Number.";

/// Holdings measurement type counted into `ldr_count`.
const LDR_MEASUREMENT_TYPE: &str = "Logical Data Record";

pub async fn run_load(config: &Config, snapshot: &Path, dry_run: bool) -> Result<()> {
    let raw = std::fs::read(snapshot)
        .with_context(|| format!("reading snapshot file: {}", snapshot.display()))?;

    let mut hasher = Sha256::new();
    hasher.update(&raw);
    let snapshot_sha256 = format!("{:x}", hasher.finalize());

    let descriptions = parse_snapshot(&raw)?;
    let object_count: usize = descriptions.iter().map(|d| d.objects.len()).sum();

    if dry_run {
        println!("load {} (dry-run)", snapshot.display());
        println!("  records found: {}", descriptions.len());
        println!("  digital objects found: {}", object_count);
        println!("  snapshot sha256: {}", snapshot_sha256);
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let result = stage_descriptions(&pool, &descriptions, &snapshot_sha256).await;
    pool.close().await;
    let summary = result?;

    println!("load {}", snapshot.display());
    println!("  records staged: {}", summary.records_staged);
    println!("  digital objects staged: {}", summary.objects_staged);
    if summary.records_skipped > 0 {
        println!("  records skipped: {}", summary.records_skipped);
    }
    println!("  snapshot sha256: {}", summary.snapshot_sha256);
    println!("ok");
    Ok(())
}

/// Empty both staging tables between runs.
pub async fn run_clear(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    for spec in schema::all_specs() {
        let cleared = sqlx::query(&format!("DELETE FROM {}", spec.staging_table))
            .execute(&pool)
            .await?;
        println!(
            "cleared {} ({} rows)",
            spec.staging_table,
            cleared.rows_affected()
        );
    }
    pool.close().await;
    println!("ok");
    Ok(())
}

async fn stage_descriptions(
    pool: &SqlitePool,
    descriptions: &[StagedDescription],
    snapshot_sha256: &str,
) -> Result<LoadSummary> {
    let loaded_at = Utc::now();
    let scrape_timestamp = loaded_at.to_rfc3339();

    let mut summary = LoadSummary {
        loaded_at,
        snapshot_sha256: snapshot_sha256.to_string(),
        records_staged: 0,
        objects_staged: 0,
        records_skipped: 0,
    };

    for description in descriptions {
        match stage_one(pool, description, &scrape_timestamp).await {
            Ok(objects) => {
                summary.records_staged += 1;
                summary.objects_staged += objects;
            }
            Err(e) => {
                warn!(naid = %description.record.naid, error = %e, "staging record failed; skipping");
                summary.records_skipped += 1;
            }
        }
    }

    sqlx::query(
        r#"
        INSERT INTO load_runs (id, loaded_at, snapshot_sha256, records_staged, objects_staged, records_skipped)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(loaded_at.to_rfc3339())
    .bind(snapshot_sha256)
    .bind(summary.records_staged as i64)
    .bind(summary.objects_staged as i64)
    .bind(summary.records_skipped as i64)
    .execute(pool)
    .await?;

    Ok(summary)
}

/// Stage one record and its digital objects in a single transaction, so a
/// failed record leaves no partial rows behind.
async fn stage_one(
    pool: &SqlitePool,
    description: &StagedDescription,
    scrape_timestamp: &str,
) -> Result<u64> {
    let record = &description.record;
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO catalog_temp (
            temp_naid, temp_title, temp_level_of_description,
            temp_parent_series_naid, temp_parent_series_title,
            temp_parent_file_unit_naid, temp_parent_file_unit_title,
            temp_creator, temp_inclusive_start_date, temp_inclusive_end_date,
            temp_coverage_start_date, temp_coverage_end_date, temp_ldr_count,
            temp_series_extents, temp_access_restriction_status,
            temp_specific_access_restrictions, temp_accession_numbers,
            temp_disposition_authority_numbers, temp_crccrca_number,
            temp_scope_and_content_note, temp_function_and_use_note,
            temp_general_notes, temp_scrape_timestamp
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.naid)
    .bind(&record.title)
    .bind(&record.level_of_description)
    .bind(&record.parent_series_naid)
    .bind(&record.parent_series_title)
    .bind(&record.parent_file_unit_naid)
    .bind(&record.parent_file_unit_title)
    .bind(&record.creator)
    .bind(&record.inclusive_start_date)
    .bind(&record.inclusive_end_date)
    .bind(&record.coverage_start_date)
    .bind(&record.coverage_end_date)
    .bind(&record.ldr_count)
    .bind(&record.series_extents)
    .bind(&record.access_restriction_status)
    .bind(&record.specific_access_restrictions)
    .bind(&record.accession_numbers)
    .bind(&record.disposition_authority_numbers)
    .bind(&record.crccrca_number)
    .bind(&record.scope_and_content_note)
    .bind(&record.function_and_use_note)
    .bind(&record.general_notes)
    .bind(scrape_timestamp)
    .execute(&mut *tx)
    .await?;

    let mut staged_objects = 0u64;
    for object in &description.objects {
        // An object without an identifier cannot be reconciled later
        let Some(object_id) = &object.digital_object_id else {
            warn!(naid = %record.naid, "digital object without objectId; skipping");
            continue;
        };
        sqlx::query(
            r#"
            INSERT INTO object_url_temp (temp_naid, temp_digital_object_url, temp_digital_object_id, temp_scrape_timestamp)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&record.naid)
        .bind(&object.digital_object_url)
        .bind(object_id)
        .bind(scrape_timestamp)
        .execute(&mut *tx)
        .await?;
        staged_objects += 1;
    }

    tx.commit().await?;
    Ok(staged_objects)
}

/// Parse a catalog API search response into staged descriptions.
///
/// The payload shape is `body.hits.hits[]._source.record`. Records without a
/// `naId` are dropped here — they could never be reconciled against the
/// current table.
pub fn parse_snapshot(raw: &[u8]) -> Result<Vec<StagedDescription>> {
    let payload: Value = serde_json::from_slice(raw).context("parsing snapshot JSON")?;
    let hits = payload
        .pointer("/body/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("snapshot payload missing body.hits.hits"))?;

    let mut descriptions = Vec::with_capacity(hits.len());
    for hit in hits {
        let Some(record) = hit.pointer("/_source/record") else {
            warn!("hit without _source.record; skipping");
            continue;
        };
        let naid = text(record, "naId");
        if naid.is_empty() {
            warn!("record without naId; skipping");
            continue;
        }
        descriptions.push(StagedDescription {
            record: extract_record(record, naid),
            objects: extract_objects(record),
        });
    }
    Ok(descriptions)
}

fn extract_record(record: &Value, naid: String) -> CatalogRecord {
    let ancestors = record.get("ancestors").and_then(Value::as_array);
    let ancestor = |index: usize, field: &str| -> Option<String> {
        ancestors
            .and_then(|a| a.get(index))
            .map(|a| text(a, field))
            .filter(|s| !s.is_empty())
    };

    let mut ldr_count = String::new();
    if let Some(occurrences) = record.get("physicalOccurrences").and_then(Value::as_array) {
        for occurrence in occurrences {
            if let Some(measurements) = occurrence
                .get("holdingsMeasurements")
                .and_then(Value::as_array)
            {
                for measurement in measurements {
                    if text(measurement, "type") == LDR_MEASUREMENT_TYPE {
                        ldr_count = text(measurement, "count");
                    }
                }
            }
        }
    }

    let mut crccrca_number = String::new();
    if let Some(variants) = record.get("variantControlNumbers").and_then(Value::as_array) {
        for variant in variants {
            if text(variant, "note") == CRCCRCA_NOTE {
                crccrca_number = text(variant, "number");
            }
        }
    }

    CatalogRecord {
        naid,
        title: text(record, "title"),
        level_of_description: text(record, "levelOfDescription"),
        parent_series_naid: ancestor(1, "naId"),
        parent_series_title: ancestor(1, "title"),
        parent_file_unit_naid: ancestor(2, "naId"),
        parent_file_unit_title: ancestor(2, "title"),
        creator: join_field(record, "creators", "heading"),
        inclusive_start_date: nested_text(record, "inclusiveStartDate", "logicalDate"),
        inclusive_end_date: nested_text(record, "inclusiveEndDate", "logicalDate"),
        coverage_start_date: nested_text(record, "coverageStartDate", "logicalDate"),
        coverage_end_date: nested_text(record, "coverageEndDate", "logicalDate"),
        ldr_count,
        series_extents: record
            .get("physicalOccurrences")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .map(|o| text(o, "extent"))
            .unwrap_or_default(),
        access_restriction_status: nested_text(record, "accessRestriction", "status"),
        specific_access_restrictions: record
            .pointer("/accessRestriction/specificAccessRestrictions")
            .and_then(Value::as_array)
            .map(|a| join_values(a, "restriction"))
            .unwrap_or_default(),
        accession_numbers: join_strings(record, "accessionNumbers"),
        disposition_authority_numbers: join_strings(record, "dispositionAuthorityNumbers"),
        crccrca_number,
        scope_and_content_note: text(record, "scopeAndContentNote"),
        function_and_use_note: text(record, "functionAndUse"),
        general_notes: join_strings(record, "generalNotes"),
    }
}

fn extract_objects(record: &Value) -> Vec<DigitalObject> {
    record
        .get("digitalObjects")
        .and_then(Value::as_array)
        .map(|objects| {
            objects
                .iter()
                .map(|object| DigitalObject {
                    digital_object_url: opt_text(object, "objectUrl"),
                    digital_object_id: opt_text(object, "objectId"),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// String value of a field; numbers are rendered as their literal text.
fn text(value: &Value, field: &str) -> String {
    match value.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn opt_text(value: &Value, field: &str) -> Option<String> {
    let s = text(value, field);
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn nested_text(value: &Value, outer: &str, inner: &str) -> String {
    value.get(outer).map(|v| text(v, inner)).unwrap_or_default()
}

fn join_field(value: &Value, field: &str, inner: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|a| join_values(a, inner))
        .unwrap_or_default()
}

fn join_values(values: &[Value], inner: &str) -> String {
    values
        .iter()
        .map(|v| text(v, inner))
        .collect::<Vec<_>>()
        .join("|")
}

fn join_strings(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("|")
        })
        .unwrap_or_default()
}
