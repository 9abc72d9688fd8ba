//! Shared transform helpers and the batch validation pass.
//!
//! Dataset-specific transforms live under `crate::datasets`; the pieces
//! here are the operations most of them share: column renames, numeric
//! coercion, sentinel handling, provenance stamping and last-wins
//! deduplication.

pub mod registry;

use crate::domain::model::{Row, Value};
use crate::domain::RawRecord;
use crate::storage::schema::TableSchema;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

/// Rename raw keys in place. Keys absent from the mapping pass through
/// untouched.
pub fn rename_keys(records: &mut [RawRecord], mapping: &HashMap<String, String>) {
    for record in records.iter_mut() {
        let renamed: Vec<(String, serde_json::Value)> = mapping
            .iter()
            .filter_map(|(from, to)| record.data.remove(from).map(|v| (to.clone(), v)))
            .collect();
        for (key, value) in renamed {
            record.data.insert(key, value);
        }
    }
}

/// Coerce a raw JSON value to a numeric cell.
///
/// Integer-valued inputs stay integers; everything else that parses
/// becomes a float. Unparsable text, NaN and non-scalar inputs all
/// collapse to Null.
pub fn coerce_numeric(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() => Value::Float(f),
                    _ => Value::Null,
                }
            }
        }
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Value::Null;
            }
            if let Ok(i) = trimmed.parse::<i64>() {
                return Value::Int(i);
            }
            match trimmed.parse::<f64>() {
                Ok(f) if f.is_finite() => Value::Float(f),
                _ => Value::Null,
            }
        }
        _ => Value::Null,
    }
}

/// Coerce a raw JSON value to a text cell. Scalars are rendered,
/// null and non-scalar inputs become Null.
pub fn coerce_text(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Number(n) => Value::Text(n.to_string()),
        serde_json::Value::Bool(b) => Value::Text(b.to_string()),
        _ => Value::Null,
    }
}

/// Map negative sentinel codes to Null. Census products encode
/// suppressed estimates as large negative numbers.
pub fn nullify_negative(value: Value) -> Value {
    match value.as_f64() {
        Some(f) if f < 0.0 => Value::Null,
        _ => value,
    }
}

/// Percentage rate `numerator / denominator * 100`, rounded to two
/// decimals. A null or zero denominator yields Null.
pub fn derived_rate(numerator: &Value, denominator: &Value) -> Value {
    match (numerator.as_f64(), denominator.as_f64()) {
        (Some(num), Some(denom)) if denom != 0.0 => {
            Value::Float((num / denom * 100.0 * 100.0).round() / 100.0)
        }
        _ => Value::Null,
    }
}

/// Stamp every row with the dataset identifier and the batch ingestion
/// timestamp.
pub fn add_provenance(rows: &mut [Row], dataset_id: &str, ingested_at: DateTime<Utc>) {
    for row in rows.iter_mut() {
        row.set("dataset_id", Value::Text(dataset_id.to_string()));
        row.set("ingestion_timestamp", Value::Timestamp(ingested_at));
    }
}

fn composite_key(row: &Row, keys: &[String]) -> Vec<String> {
    keys.iter()
        .map(|k| row.get(k).map(Value::key_repr).unwrap_or_default())
        .collect()
}

/// Collapse rows sharing the same key tuple, keeping the last
/// occurrence in batch order. First-occurrence positions are preserved.
pub fn dedupe_last_wins(rows: Vec<Row>, keys: &[String]) -> Vec<Row> {
    if keys.is_empty() {
        return rows;
    }
    let mut deduped: Vec<Row> = Vec::with_capacity(rows.len());
    let mut seen: HashMap<Vec<String>, usize> = HashMap::new();
    for row in rows {
        let key = composite_key(&row, keys);
        match seen.get(&key) {
            Some(&index) => deduped[index] = row,
            None => {
                seen.insert(key, deduped.len());
                deduped.push(row);
            }
        }
    }
    deduped
}

/// A data quality finding on a canonical batch. Warnings are reported
/// and logged; they never abort an ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    MissingColumn { column: String },
    OutOfRange { column: String, count: usize },
    DuplicateKeys { count: usize },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::MissingColumn { column } => {
                write!(f, "required column '{}' missing from batch", column)
            }
            ValidationWarning::OutOfRange { column, count } => {
                write!(f, "{} value(s) in '{}' outside the allowed range", count, column)
            }
            ValidationWarning::DuplicateKeys { count } => {
                write!(f, "{} row(s) share a unique key with an earlier row", count)
            }
        }
    }
}

/// Check a canonical batch against the schema's validation metadata.
///
/// Every finding is a warning. Missing required columns, out-of-range
/// values and residual duplicate keys are all reported without failing
/// the batch.
pub fn validate_batch(
    rows: &[Row],
    schema: &TableSchema,
    unique_keys: &[String],
) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    for col in &schema.columns {
        if col.required && !rows.iter().any(|row| row.contains(&col.name)) {
            warnings.push(ValidationWarning::MissingColumn {
                column: col.name.clone(),
            });
        }
        if col.min.is_some() || col.max.is_some() {
            let count = rows
                .iter()
                .filter_map(|row| row.get(&col.name).and_then(Value::as_f64))
                .filter(|v| {
                    col.min.is_some_and(|min| *v < min) || col.max.is_some_and(|max| *v > max)
                })
                .count();
            if count > 0 {
                warnings.push(ValidationWarning::OutOfRange {
                    column: col.name.clone(),
                    count,
                });
            }
        }
    }

    if !unique_keys.is_empty() {
        let mut seen = std::collections::HashSet::new();
        let duplicates = rows
            .iter()
            .filter(|row| !seen.insert(composite_key(row, unique_keys)))
            .count();
        if duplicates > 0 {
            warnings.push(ValidationWarning::DuplicateKeys { count: duplicates });
        }
    }

    warnings
}
