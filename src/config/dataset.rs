//! Per-dataset configuration.
//!
//! A registry TOML maps dataset keys to metadata and a per-dataset
//! config file; each per-dataset file declares the source, the storage
//! schema and the validation rules. Both are parsed once at startup
//! and read-only afterwards.

use crate::config::substitute_env_vars;
use crate::storage::schema::{ColumnSpec, ColumnType, IndexSpec, TableSchema};
use crate::utils::error::{IngestError, Result};
use crate::utils::validation::{self, Validate};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// The registry of known datasets (`config/registry.toml`).
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetRegistry {
    pub datasets: HashMap<String, RegistryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub dataset_id: String,
    pub table_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub update_frequency: String,
    pub config_path: String,
}

impl DatasetRegistry {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content).map_err(|e| IngestError::Config {
            message: format!("registry parsing error: {}", e),
        })
    }

    pub fn entry(&self, key: &str) -> Result<&RegistryEntry> {
        self.datasets
            .get(key)
            .ok_or_else(|| IngestError::UnknownDataset {
                key: key.to_string(),
            })
    }

    /// Enabled dataset keys in stable (sorted) order.
    pub fn enabled_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .datasets
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

/// How a dataset's raw batch is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    PaginatedApi,
    CensusApi,
    ShapefileDownload,
    UrlDownload,
}

/// Complete configuration for one dataset (`config/datasets/<key>.toml`).
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetDescriptor {
    pub dataset: DatasetInfo,
    pub source: SourceKind,
    pub api: Option<ApiSourceConfig>,
    pub census: Option<CensusSourceConfig>,
    pub shapefile: Option<DownloadConfig>,
    pub url: Option<DownloadConfig>,
    pub filters: Option<FilterConfig>,
    pub schema: SchemaConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetInfo {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSourceConfig {
    pub endpoint: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Portal CSV export of the same dataset, used by the cached-file
    /// source mode.
    pub csv_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CensusSourceConfig {
    pub year: u16,
    pub dataset: String,
    pub geography: String,
    /// API variable code to canonical column name.
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    pub url: String,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub zip_codes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaConfig {
    pub table_name: String,
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
    /// Constraint strings, e.g. `UNIQUE(year, nta_code)`.
    #[serde(default)]
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_descriptor: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    pub default: Option<String>,
    #[serde(default)]
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_true")]
    pub allow_duplicates: bool,
    #[serde(default)]
    pub unique_keys: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            allow_duplicates: true,
            unique_keys: Vec::new(),
        }
    }
}

impl DatasetDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = substitute_env_vars(content);
        let descriptor: DatasetDescriptor =
            toml::from_str(&processed).map_err(|e| IngestError::Config {
                message: format!("dataset config parsing error: {}", e),
            })?;
        descriptor.check_source_block()?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Each source kind needs its own config block present.
    fn check_source_block(&self) -> Result<()> {
        let present = match self.source {
            SourceKind::PaginatedApi => self.api.is_some(),
            SourceKind::CensusApi => self.census.is_some(),
            SourceKind::ShapefileDownload => self.shapefile.is_some(),
            SourceKind::UrlDownload => self.url.is_some(),
        };
        if present {
            Ok(())
        } else {
            Err(IngestError::Config {
                message: format!(
                    "dataset '{}' declares source {:?} but its config block is missing",
                    self.dataset.id, self.source
                ),
            })
        }
    }

    pub fn zip_codes(&self) -> &[String] {
        self.filters
            .as_ref()
            .map(|f| f.zip_codes.as_slice())
            .unwrap_or(&[])
    }

    /// Parse the declared schema into its strongly-typed form. Malformed
    /// type descriptors, constraints and dangling column references all
    /// fail here, before any network or storage activity.
    pub fn table_schema(&self) -> Result<TableSchema> {
        let mut columns = Vec::with_capacity(self.schema.columns.len());
        for col in &self.schema.columns {
            columns.push(ColumnSpec {
                name: col.name.clone(),
                ty: ColumnType::parse(&col.name, &col.type_descriptor)?,
                nullable: col.nullable,
                primary_key: col.primary_key,
                default: col.default.clone(),
                required: col.required,
                min: col.min,
                max: col.max,
            });
        }

        let indexes = self
            .schema
            .indexes
            .iter()
            .map(|index| IndexSpec {
                name: index.name.clone(),
                columns: index.columns.clone(),
            })
            .collect();

        let mut uniques = Vec::new();
        for constraint in &self.schema.constraints {
            uniques.push(parse_unique_constraint(&self.schema.table_name, constraint)?);
        }

        let schema = TableSchema {
            table_name: self.schema.table_name.clone(),
            columns,
            indexes,
            uniques,
        };
        schema.check_references()?;
        Ok(schema)
    }
}

impl Validate for DatasetDescriptor {
    fn validate(&self) -> Result<()> {
        validation::validate_non_empty_string("schema.table_name", &self.schema.table_name)?;
        if let Some(api) = &self.api {
            validation::validate_positive_number("api.page_size", api.page_size, 1)?;
            validation::validate_positive_number("api.timeout_secs", api.timeout_secs as usize, 1)?;
            if let Some(endpoint) = &api.endpoint {
                validation::validate_url("api.endpoint", endpoint)?;
            }
            if let Some(csv_url) = &api.csv_url {
                validation::validate_url("api.csv_url", csv_url)?;
            }
        }
        if let Some(shapefile) = &self.shapefile {
            validation::validate_url("shapefile.url", &shapefile.url)?;
        }
        if let Some(url) = &self.url {
            validation::validate_url("url.url", &url.url)?;
        }
        // Deduplication needs a key to dedupe on.
        if !self.validation.allow_duplicates && self.validation.unique_keys.is_empty() {
            return Err(IngestError::Config {
                message: format!(
                    "dataset '{}' sets allow_duplicates = false but declares no unique_keys",
                    self.dataset.id
                ),
            });
        }
        Ok(())
    }
}

fn parse_unique_constraint(table: &str, constraint: &str) -> Result<Vec<String>> {
    let trimmed = constraint.trim();
    let inner = trimmed
        .strip_prefix("UNIQUE(")
        .or_else(|| trimmed.strip_prefix("UNIQUE ("))
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| IngestError::Schema {
            table: table.to_string(),
            message: format!("unsupported constraint '{}'", constraint),
        })?;
    let columns: Vec<String> = inner
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if columns.is_empty() {
        return Err(IngestError::Schema {
            table: table.to_string(),
            message: format!("empty constraint '{}'", constraint),
        });
    }
    Ok(columns)
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> usize {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOOD_SUPPLY: &str = r#"
source = "paginated_api"

[dataset]
id = "39ihbhg"
name = "Emergency Food Supply Gap"

[api]
endpoint = "https://data.cityofnewyork.us/api/v3/views/39ihbhg/query.json"
page_size = 1000

[schema]
table_name = "food_supply_gaps"
constraints = ["UNIQUE(dataset_id, year, nta_code)"]

[[schema.columns]]
name = "id"
type = "SERIAL"
primary_key = true

[[schema.columns]]
name = "dataset_id"
type = "VARCHAR(20)"
nullable = false

[[schema.columns]]
name = "year"
type = "INTEGER"
nullable = false
required = true

[[schema.columns]]
name = "nta_code"
type = "VARCHAR(10)"
nullable = false
required = true

[[schema.columns]]
name = "food_insecure_pct"
type = "NUMERIC(5, 2)"
min = 0.0
max = 100.0

[[schema.indexes]]
name = "idx_nta_code"
columns = ["nta_code"]

[validation]
unique_keys = ["dataset_id", "year", "nta_code"]
"#;

    #[test]
    fn test_parse_dataset_descriptor() {
        let descriptor = DatasetDescriptor::from_toml_str(FOOD_SUPPLY).unwrap();
        assert_eq!(descriptor.source, SourceKind::PaginatedApi);
        assert_eq!(descriptor.api.as_ref().unwrap().page_size, 1000);
        assert_eq!(
            descriptor.validation.unique_keys,
            vec!["dataset_id", "year", "nta_code"]
        );
    }

    #[test]
    fn test_schema_preserves_column_order() {
        let descriptor = DatasetDescriptor::from_toml_str(FOOD_SUPPLY).unwrap();
        let schema = descriptor.table_schema().unwrap();
        let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["id", "dataset_id", "year", "nta_code", "food_insecure_pct"]
        );
    }

    #[test]
    fn test_unique_constraint_parsed() {
        let descriptor = DatasetDescriptor::from_toml_str(FOOD_SUPPLY).unwrap();
        let schema = descriptor.table_schema().unwrap();
        assert_eq!(
            schema.uniques,
            vec![vec![
                "dataset_id".to_string(),
                "year".to_string(),
                "nta_code".to_string()
            ]]
        );
    }

    #[test]
    fn test_missing_source_block_rejected() {
        let broken = FOOD_SUPPLY.replace("[api]", "[unused]");
        assert!(DatasetDescriptor::from_toml_str(&broken).is_err());
    }

    #[test]
    fn test_constraint_referencing_unknown_column_rejected() {
        let broken = FOOD_SUPPLY.replace(
            "UNIQUE(dataset_id, year, nta_code)",
            "UNIQUE(year, no_such_column)",
        );
        let descriptor = DatasetDescriptor::from_toml_str(&broken).unwrap();
        assert!(descriptor.table_schema().is_err());
    }

    #[test]
    fn test_malformed_type_descriptor_rejected() {
        let broken = FOOD_SUPPLY.replace("NUMERIC(5, 2)", "NUMERIC(5, 2");
        let descriptor = DatasetDescriptor::from_toml_str(&broken).unwrap();
        assert!(descriptor.table_schema().is_err());
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let broken = FOOD_SUPPLY.replace("page_size = 1000", "page_size = 0");
        let err = DatasetDescriptor::from_toml_str(&broken).unwrap_err();
        assert!(matches!(
            err,
            IngestError::InvalidConfigValue { ref field, .. } if field == "api.page_size"
        ));
    }

    #[test]
    fn test_blank_table_name_rejected() {
        let broken = FOOD_SUPPLY.replace(
            r#"table_name = "food_supply_gaps""#,
            r#"table_name = "   ""#,
        );
        assert!(DatasetDescriptor::from_toml_str(&broken).is_err());
    }

    #[test]
    fn test_invalid_endpoint_url_rejected() {
        let broken = FOOD_SUPPLY.replace(
            "https://data.cityofnewyork.us/api/v3/views/39ihbhg/query.json",
            "not-a-url",
        );
        assert!(DatasetDescriptor::from_toml_str(&broken).is_err());
    }

    #[test]
    fn test_duplicate_policy_requires_unique_keys() {
        let broken = FOOD_SUPPLY.replace(
            r#"unique_keys = ["dataset_id", "year", "nta_code"]"#,
            "allow_duplicates = false",
        );
        assert!(DatasetDescriptor::from_toml_str(&broken).is_err());

        let ok = FOOD_SUPPLY.replace(
            "[validation]",
            "[validation]\nallow_duplicates = false",
        );
        let descriptor = DatasetDescriptor::from_toml_str(&ok).unwrap();
        assert!(!descriptor.validation.allow_duplicates);
    }

    #[test]
    fn test_registry_lookup() {
        let registry: DatasetRegistry = toml::from_str(
            r#"
[datasets.food_supply_gap]
name = "Emergency Food Supply Gap"
dataset_id = "39ihbhg"
table_name = "food_supply_gaps"
enabled = true
update_frequency = "annual"
config_path = "config/datasets/food_supply_gap.toml"

[datasets.zillow_zori]
name = "Zillow Observed Rent Index"
dataset_id = "zillow_zori"
table_name = "rent_index"
enabled = false
update_frequency = "monthly"
config_path = "config/datasets/zillow_zori.toml"
"#,
        )
        .unwrap();

        assert!(registry.entry("food_supply_gap").is_ok());
        assert!(registry.entry("missing").is_err());
        assert_eq!(registry.enabled_keys(), vec!["food_supply_gap"]);
    }
}
