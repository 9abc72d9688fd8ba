use crate::config::dataset::DatasetDescriptor;
use crate::domain::model::{RawRecord, Row, Value};
use crate::domain::ports::DatasetTransformer;
use crate::storage::schema::TableSchema;
use crate::utils::error::Result;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

const REGION_COLUMN: &str = "RegionName";
const METADATA_COLUMNS: [&str; 9] = [
    "RegionID",
    "RegionName",
    "RegionType",
    "StateName",
    "State",
    "City",
    "Metro",
    "CountyName",
    "SizeRank",
];

/// Zillow observed rent index, published as a wide CSV with one column
/// per month. The transform melts the date columns and keeps only the
/// latest observation per zip code.
pub struct ZillowZoriTransformer {
    schema: TableSchema,
    zip_codes: HashSet<String>,
    dataset_id: String,
}

impl ZillowZoriTransformer {
    pub fn new(descriptor: &DatasetDescriptor) -> Result<Self> {
        Ok(Self {
            schema: descriptor.table_schema()?,
            zip_codes: descriptor.zip_codes().iter().cloned().collect(),
            dataset_id: descriptor.dataset.id.clone(),
        })
    }
}

impl DatasetTransformer for ZillowZoriTransformer {
    fn transform(&self, raw: Vec<RawRecord>) -> Result<Vec<Row>> {
        // Latest (date, rent_index) observed per zip code.
        let mut latest: HashMap<String, (NaiveDate, f64)> = HashMap::new();

        for record in &raw {
            let zip = match record.data.get(REGION_COLUMN).and_then(|v| v.as_str()) {
                Some(zip) if self.zip_codes.contains(zip) => zip.to_string(),
                _ => continue,
            };
            for (column, value) in &record.data {
                if METADATA_COLUMNS.contains(&column.as_str()) {
                    continue;
                }
                let Ok(date) = NaiveDate::parse_from_str(column, "%Y-%m-%d") else {
                    continue;
                };
                let Some(rent) = parse_rent(value) else {
                    continue;
                };
                match latest.get(&zip) {
                    Some((seen, _)) if *seen >= date => {}
                    _ => {
                        latest.insert(zip.clone(), (date, rent));
                    }
                }
            }
        }

        let mut rows: Vec<Row> = latest
            .into_iter()
            .map(|(zip, (date, rent))| {
                let mut row = Row::new();
                row.set("zip_code", Value::Text(zip));
                row.set("rent_index", Value::Float(rent));
                row.set(
                    "date",
                    Value::Timestamp(date.and_hms_opt(0, 0, 0).unwrap().and_utc()),
                );
                row
            })
            .collect();
        rows.sort_by(|a, b| {
            a.get("zip_code")
                .map(Value::key_repr)
                .cmp(&b.get("zip_code").map(Value::key_repr))
        });

        tracing::info!("Kept latest rent index for {} zip codes", rows.len());
        crate::transform::add_provenance(&mut rows, &self.dataset_id, chrono::Utc::now());
        Ok(rows)
    }

    fn schema(&self) -> &TableSchema {
        &self.schema
    }
}

fn parse_rent(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        serde_json::Value::String(s) if !s.trim().is_empty() => {
            s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}
