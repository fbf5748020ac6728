//! Result, review-queue, and summary exports.
//!
//! The results and review-queue tables are CSV with a stable leading
//! column order; metadata keys are flattened into trailing `meta.*`
//! columns. The summary object is written as pretty JSON.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::PipelineError;
use crate::models::GeocodeRecord;
use crate::pipeline::PipelineSummary;

/// Fixed leading columns of the results and review-queue tables.
const COLUMNS: &[&str] = &[
    "ticket_number",
    "version",
    "latitude",
    "longitude",
    "confidence",
    "quality_tier",
    "review_priority",
    "method",
    "approach",
    "validation_flags",
    "reasoning",
    "created_by_stage",
    "created_at",
    "locked",
    "processing_time_ms",
    "street",
    "intersection",
    "city",
    "county",
    "ticket_type",
    "duration",
    "work_type",
    "excavator",
    "geocode_key",
];

/// Write the results table: one row per ticket's current record.
/// Returns the number of rows written.
pub fn write_results_csv(path: &Path, records: &[GeocodeRecord]) -> Result<usize, PipelineError> {
    write_table(path, records)
}

/// Write the review-queue table. The caller supplies records already
/// filtered and sorted (see [`crate::pipeline::build_review_queue`]).
pub fn write_review_queue_csv(
    path: &Path,
    records: &[GeocodeRecord],
) -> Result<usize, PipelineError> {
    write_table(path, records)
}

/// Write the batch summary as pretty JSON.
pub fn write_summary_json(path: &Path, summary: &PipelineSummary) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| PipelineError::Storage(e.to_string()))?;
    ensure_parent(path)?;
    std::fs::write(path, json)?;
    Ok(())
}

fn write_table(path: &Path, records: &[GeocodeRecord]) -> Result<usize, PipelineError> {
    // Union of metadata keys across the batch, in sorted order
    let meta_keys: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.metadata.keys().map(|k| k.as_str()))
        .collect();

    let mut out = String::new();
    let mut header: Vec<String> = COLUMNS.iter().map(|c| c.to_string()).collect();
    header.extend(meta_keys.iter().map(|k| format!("meta.{k}")));
    out.push_str(&header.join(","));
    out.push('\n');

    for record in records {
        let mut row: Vec<String> = vec![
            csv_field(&record.ticket_number),
            record.version.to_string(),
            opt_float(record.latitude),
            opt_float(record.longitude),
            opt_float(record.confidence),
            record.quality_tier.as_str().to_string(),
            record.review_priority.as_str().to_string(),
            csv_field(&record.method),
            csv_field(record.approach.as_deref().unwrap_or("")),
            csv_field(&record.validation_flags.join(",")),
            csv_field(record.reasoning.as_deref().unwrap_or("")),
            csv_field(record.created_by_stage.as_deref().unwrap_or("")),
            record
                .created_at
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
            record.locked.to_string(),
            record
                .processing_time_ms
                .map(|ms| ms.to_string())
                .unwrap_or_default(),
            csv_field(record.street.as_deref().unwrap_or("")),
            csv_field(record.intersection.as_deref().unwrap_or("")),
            csv_field(record.city.as_deref().unwrap_or("")),
            csv_field(record.county.as_deref().unwrap_or("")),
            csv_field(record.ticket_type.as_deref().unwrap_or("")),
            csv_field(record.duration.as_deref().unwrap_or("")),
            csv_field(record.work_type.as_deref().unwrap_or("")),
            csv_field(record.excavator.as_deref().unwrap_or("")),
            record.geocode_key.clone(),
        ];
        for key in &meta_keys {
            let value = match record.metadata.get(*key) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(value) => value.to_string(),
                None => String::new(),
            };
            row.push(csv_field(&value));
        }
        out.push_str(&row.join(","));
        out.push('\n');
    }

    ensure_parent(path)?;
    std::fs::write(path, out)?;
    Ok(records.len())
}

fn ensure_parent(path: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn opt_float(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Quote a CSV field when it contains a delimiter, quote, or newline.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
