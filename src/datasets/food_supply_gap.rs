use crate::config::dataset::DatasetDescriptor;
use crate::domain::model::{RawRecord, Row, Value};
use crate::domain::ports::DatasetTransformer;
use crate::storage::schema::TableSchema;
use crate::transform::{coerce_numeric, coerce_text, dedupe_last_wins};
use crate::utils::error::Result;
use std::collections::HashMap;

const NUMERIC_COLUMNS: [&str; 5] = [
    "supply_gap_lbs",
    "food_insecure_pct",
    "unemployment_rate",
    "vulnerable_pop_score",
    "weighted_score",
];
const PERCENT_COLUMNS: [&str; 2] = ["food_insecure_pct", "unemployment_rate"];

/// Emergency food supply gap figures per neighborhood tabulation area.
///
/// Raw records come from the open-data portal and still carry SODA
/// metadata fields (keys starting with `:`); those are dropped before
/// the column names are standardized.
pub struct FoodSupplyGapTransformer {
    schema: TableSchema,
    dataset_id: String,
}

impl FoodSupplyGapTransformer {
    pub fn new(descriptor: &DatasetDescriptor) -> Result<Self> {
        Ok(Self {
            schema: descriptor.table_schema()?,
            dataset_id: descriptor.dataset.id.clone(),
        })
    }
}

impl DatasetTransformer for FoodSupplyGapTransformer {
    fn transform(&self, raw: Vec<RawRecord>) -> Result<Vec<Row>> {
        let mut rows = Vec::with_capacity(raw.len());
        for record in &raw {
            let data = standardize_keys(record);
            let mut row = Row::new();

            row.set(
                "year",
                data.get("year").map(coerce_numeric).unwrap_or(Value::Null),
            );
            let nta_code = match data.get("nta_code").map(coerce_text) {
                Some(Value::Text(code)) => Value::Text(code.trim().to_string()),
                _ => Value::Null,
            };
            row.set("nta_code", nta_code);
            row.set(
                "nta_name",
                data.get("nta_name").map(coerce_text).unwrap_or(Value::Null),
            );
            for column in NUMERIC_COLUMNS {
                row.set(
                    column,
                    data.get(column).map(coerce_numeric).unwrap_or(Value::Null),
                );
            }
            row.set(
                "rank",
                data.get("rank").map(coerce_numeric).unwrap_or(Value::Null),
            );
            rows.push(row);
        }

        clamp_percentages(&mut rows);

        let keys = vec!["year".to_string(), "nta_code".to_string()];
        let mut rows = dedupe_last_wins(rows, &keys);

        crate::transform::add_provenance(&mut rows, &self.dataset_id, chrono::Utc::now());

        // Stable presentation order, rows without a rank at the end.
        rows.sort_by(|a, b| {
            let year = |r: &Row| r.get("year").and_then(Value::as_f64);
            let rank = |r: &Row| r.get("rank").and_then(Value::as_f64);
            match (year(a), year(b)) {
                (Some(ya), Some(yb)) if ya != yb => ya.partial_cmp(&yb).unwrap(),
                _ => match (rank(a), rank(b)) {
                    (Some(ra), Some(rb)) => ra.partial_cmp(&rb).unwrap(),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                },
            }
        });
        Ok(rows)
    }

    fn schema(&self) -> &TableSchema {
        &self.schema
    }
}

/// Drop SODA metadata keys, lowercase the rest, map spaces to
/// underscores and apply the portal-to-schema renames.
fn standardize_keys(record: &RawRecord) -> HashMap<String, serde_json::Value> {
    let mut data = HashMap::with_capacity(record.data.len());
    for (key, value) in &record.data {
        if key.starts_with(':') {
            continue;
        }
        let standardized = key.trim().to_ascii_lowercase().replace(' ', "_");
        let renamed = match standardized.as_str() {
            "nta" => "nta_code".to_string(),
            "food_insecure_percentage" => "food_insecure_pct".to_string(),
            "vulnerable_population" => "vulnerable_pop_score".to_string(),
            _ => standardized,
        };
        data.insert(renamed, value.clone());
    }
    data
}

fn clamp_percentages(rows: &mut [Row]) {
    for column in PERCENT_COLUMNS {
        let mut invalid = 0usize;
        for row in rows.iter_mut() {
            if let Some(v) = row.get(column).and_then(Value::as_f64) {
                if !(0.0..=100.0).contains(&v) {
                    row.set(column, Value::Null);
                    invalid += 1;
                }
            }
        }
        if invalid > 0 {
            tracing::warn!("Found {} invalid values in {}, set to null", invalid, column);
        }
    }
}
