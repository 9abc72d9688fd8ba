use crate::config::dataset::DatasetDescriptor;
use crate::domain::model::{RawRecord, Row, Value};
use crate::domain::ports::DatasetTransformer;
use crate::storage::schema::TableSchema;
use crate::transform::{coerce_numeric, coerce_text, derived_rate, nullify_negative, rename_keys};
use crate::utils::error::{IngestError, Result};
use std::collections::HashMap;

const GEOGRAPHY_COLUMN: &str = "zip code tabulation area";
const NUMERIC_COLUMNS: [&str; 3] = ["median_household_income", "poverty_universe", "poverty_count"];

/// Income and poverty estimates from the census ACS five-year product.
///
/// The API answers with variable codes (`B19013_001E`, ...); the
/// configured variable map renames them, suppressed estimates (negative
/// sentinels) become nulls and the poverty rate is derived from the
/// count and universe columns.
pub struct CensusAcsTransformer {
    schema: TableSchema,
    variables: HashMap<String, String>,
    year: u16,
    dataset_id: String,
}

impl CensusAcsTransformer {
    pub fn new(descriptor: &DatasetDescriptor) -> Result<Self> {
        let census = descriptor
            .census
            .as_ref()
            .ok_or_else(|| IngestError::Config {
                message: format!(
                    "dataset '{}' has no [census] block",
                    descriptor.dataset.id
                ),
            })?;
        Ok(Self {
            schema: descriptor.table_schema()?,
            variables: census.variables.clone(),
            year: census.year,
            dataset_id: descriptor.dataset.id.clone(),
        })
    }
}

impl DatasetTransformer for CensusAcsTransformer {
    fn transform(&self, mut raw: Vec<RawRecord>) -> Result<Vec<Row>> {
        let mut mapping = self.variables.clone();
        mapping.insert(GEOGRAPHY_COLUMN.to_string(), "zip_code".to_string());
        rename_keys(&mut raw, &mapping);

        let mut rows = Vec::with_capacity(raw.len());
        for record in &raw {
            let mut row = Row::new();
            row.set(
                "zip_code",
                record.data.get("zip_code").map(coerce_text).unwrap_or(Value::Null),
            );
            for column in NUMERIC_COLUMNS {
                let value = record
                    .data
                    .get(column)
                    .map(coerce_numeric)
                    .unwrap_or(Value::Null);
                row.set(column, nullify_negative(value));
            }
            row.set(
                "poverty_rate",
                derived_rate(
                    row.get("poverty_count").unwrap_or(&Value::Null),
                    row.get("poverty_universe").unwrap_or(&Value::Null),
                ),
            );
            row.set("year", Value::Int(self.year as i64));
            rows.push(row);
        }

        crate::transform::add_provenance(&mut rows, &self.dataset_id, chrono::Utc::now());
        Ok(rows)
    }

    fn schema(&self) -> &TableSchema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::dataset::DatasetDescriptor;
    use crate::domain::ports::DatasetTransformer;

    const CONFIG: &str = r#"
source = "census_api"

[dataset]
id = "census_acs"
name = "Census ACS income and poverty"

[census]
year = 2023
dataset = "acs/acs5"
geography = "zip code tabulation area"

[census.variables]
B19013_001E = "median_household_income"
B17020_001E = "poverty_universe"
B17020_002E = "poverty_count"

[schema]
table_name = "census_acs"
constraints = ["UNIQUE(year, zip_code)"]

[[schema.columns]]
name = "id"
type = "SERIAL"
primary_key = true

[[schema.columns]]
name = "dataset_id"
type = "VARCHAR(20)"
nullable = false

[[schema.columns]]
name = "zip_code"
type = "VARCHAR(5)"
nullable = false
required = true

[[schema.columns]]
name = "year"
type = "INTEGER"
nullable = false

[[schema.columns]]
name = "median_household_income"
type = "NUMERIC(12, 2)"

[[schema.columns]]
name = "poverty_universe"
type = "NUMERIC(12, 2)"

[[schema.columns]]
name = "poverty_count"
type = "NUMERIC(12, 2)"

[[schema.columns]]
name = "poverty_rate"
type = "NUMERIC(5, 2)"
min = 0.0
max = 100.0

[[schema.columns]]
name = "ingestion_timestamp"
type = "TIMESTAMP"
nullable = false

[validation]
unique_keys = ["year", "zip_code"]
"#;

    fn record(pairs: &[(&str, serde_json::Value)]) -> RawRecord {
        RawRecord {
            data: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn transformer() -> CensusAcsTransformer {
        let descriptor = DatasetDescriptor::from_toml_str(CONFIG).unwrap();
        CensusAcsTransformer::new(&descriptor).unwrap()
    }

    #[test]
    fn test_renames_and_derives_poverty_rate() {
        let raw = vec![record(&[
            ("B19013_001E", serde_json::json!("85000")),
            ("B17020_001E", serde_json::json!("1000")),
            ("B17020_002E", serde_json::json!("150")),
            ("zip code tabulation area", serde_json::json!("10001")),
        ])];

        let rows = transformer().transform(raw).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("zip_code"), Some(&Value::Text("10001".into())));
        assert_eq!(
            rows[0].get("median_household_income"),
            Some(&Value::Int(85000))
        );
        assert_eq!(rows[0].get("poverty_rate"), Some(&Value::Float(15.0)));
        assert_eq!(rows[0].get("year"), Some(&Value::Int(2023)));
        assert_eq!(
            rows[0].get("dataset_id"),
            Some(&Value::Text("census_acs".into()))
        );
    }

    #[test]
    fn test_sentinel_income_becomes_null() {
        let raw = vec![record(&[
            ("B19013_001E", serde_json::json!("-666666666")),
            ("B17020_001E", serde_json::json!("0")),
            ("B17020_002E", serde_json::json!("0")),
            ("zip code tabulation area", serde_json::json!("10002")),
        ])];

        let rows = transformer().transform(raw).unwrap();
        assert_eq!(rows[0].get("median_household_income"), Some(&Value::Null));
        // Zero universe means the rate is undefined, not zero.
        assert_eq!(rows[0].get("poverty_rate"), Some(&Value::Null));
    }
}
