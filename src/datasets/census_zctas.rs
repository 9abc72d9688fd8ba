use crate::config::dataset::DatasetDescriptor;
use crate::domain::model::{RawRecord, Row, Value};
use crate::domain::ports::DatasetTransformer;
use crate::storage::schema::TableSchema;
use crate::utils::error::Result;
use std::collections::HashSet;

const ZCTA_COLUMN: &str = "ZCTA5CE20";

/// Census ZCTA boundary polygons, filtered to the configured zip codes.
///
/// The shapefile source already renders geometries as multipolygon WKT;
/// this transform only filters, renames and stamps provenance.
pub struct CensusZctasTransformer {
    schema: TableSchema,
    zip_codes: HashSet<String>,
    dataset_id: String,
}

impl CensusZctasTransformer {
    pub fn new(descriptor: &DatasetDescriptor) -> Result<Self> {
        Ok(Self {
            schema: descriptor.table_schema()?,
            zip_codes: descriptor.zip_codes().iter().cloned().collect(),
            dataset_id: descriptor.dataset.id.clone(),
        })
    }
}

impl DatasetTransformer for CensusZctasTransformer {
    fn transform(&self, raw: Vec<RawRecord>) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for record in &raw {
            let zip = match record.data.get(ZCTA_COLUMN).and_then(|v| v.as_str()) {
                Some(zip) if self.zip_codes.contains(zip) => zip.to_string(),
                _ => continue,
            };
            let geometry = match record.data.get("geometry").and_then(|v| v.as_str()) {
                Some(wkt) => Value::Geometry(wkt.to_string()),
                None => Value::Null,
            };

            let mut row = Row::new();
            row.set("zip_code", Value::Text(zip));
            row.set("geometry", geometry);
            rows.push(row);
        }

        tracing::info!(
            "Kept {} of {} boundary features after zip filter",
            rows.len(),
            raw.len()
        );
        crate::transform::add_provenance(&mut rows, &self.dataset_id, chrono::Utc::now());
        Ok(rows)
    }

    fn schema(&self) -> &TableSchema {
        &self.schema
    }
}
