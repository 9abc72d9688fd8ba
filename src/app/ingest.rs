//! Pipeline orchestration.
//!
//! `Pipeline` sequences one ingestion run per dataset: fetch, transform,
//! validate, provision, write, ledger update and Parquet export. A dry
//! run stops after validation; `ingest_all` keeps going past per-dataset
//! failures and reports them at the end.

use crate::config::dataset::{
    DatasetDescriptor, DatasetRegistry, RegistryEntry, SourceKind, ValidationConfig,
};
use crate::config::AppConfig;
use crate::domain::ports::{Fetch, FetchOptions};
use crate::domain::{RawRecord, Row};
use crate::fetch::file::{download_file, load_records};
use crate::fetch::{CensusFetcher, PaginatedFetcher, ShapefileFetcher, UrlFetcher};
use crate::storage::{export_parquet, DataStore};
use crate::transform::registry::transformer_for;
use crate::transform::{dedupe_last_wins, validate_batch};
use crate::utils::error::{IngestError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Fetch live from the configured source.
    Api,
    /// Reuse (or download once) the dataset's cached file export.
    File,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub source: SourceMode,
    pub filters: Option<HashMap<String, serde_json::Value>>,
    pub force: bool,
    pub dry_run: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            source: SourceMode::Api,
            filters: None,
            force: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub dataset_key: String,
    pub dataset_name: String,
    pub table_name: String,
    pub record_count: usize,
    pub parquet_path: Option<PathBuf>,
    pub dry_run: bool,
    pub skipped: bool,
}

pub struct Pipeline {
    app: AppConfig,
    registry: DatasetRegistry,
}

impl Pipeline {
    pub fn new(app: AppConfig, registry: DatasetRegistry) -> Self {
        Self { app, registry }
    }

    /// Run one dataset end to end.
    pub async fn ingest_dataset(&self, key: &str, opts: &IngestOptions) -> Result<IngestReport> {
        tracing::info!("Starting ingestion for dataset: {}", key);

        let entry = self.registry.entry(key)?;
        if !entry.enabled {
            tracing::warn!("Dataset '{}' is disabled in registry, skipping", key);
            return Ok(IngestReport {
                dataset_key: key.to_string(),
                dataset_name: entry.name.clone(),
                table_name: entry.table_name.clone(),
                record_count: 0,
                parquet_path: None,
                dry_run: opts.dry_run,
                skipped: true,
            });
        }

        let descriptor = DatasetDescriptor::from_file(&entry.config_path)?;
        let transformer = transformer_for(key, &descriptor)?;

        tracing::info!("📥 Step 1: fetching raw data");
        let raw = self.fetch_raw(entry, &descriptor, opts).await?;
        if raw.is_empty() {
            tracing::warn!("No data fetched for '{}', nothing to store", key);
            return Ok(IngestReport {
                dataset_key: key.to_string(),
                dataset_name: entry.name.clone(),
                table_name: entry.table_name.clone(),
                record_count: 0,
                parquet_path: None,
                dry_run: opts.dry_run,
                skipped: false,
            });
        }
        tracing::info!("📥 Fetched {} raw records", raw.len());

        tracing::info!("🔄 Step 2: transforming and validating");
        let rows = transformer.transform(raw)?;
        let rows = apply_duplicate_policy(rows, &descriptor.validation);
        let schema = transformer.schema();
        let warnings = validate_batch(&rows, schema, &descriptor.validation.unique_keys);
        for warning in &warnings {
            tracing::warn!("Validation: {}", warning);
        }
        tracing::info!(
            "🔄 Transformed into {} rows ({} validation warnings)",
            rows.len(),
            warnings.len()
        );

        if opts.dry_run {
            let columns: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
            tracing::info!("Dry run: {} rows, columns: {}", rows.len(), columns.join(", "));
            for row in rows.iter().take(10) {
                tracing::info!("Dry run preview: {:?}", row);
            }
            tracing::info!("Dry run completed, no data stored");
            return Ok(IngestReport {
                dataset_key: key.to_string(),
                dataset_name: entry.name.clone(),
                table_name: entry.table_name.clone(),
                record_count: rows.len(),
                parquet_path: None,
                dry_run: true,
                skipped: false,
            });
        }

        tracing::info!("💾 Step 3: storing into {}", entry.table_name);
        let mut store = DataStore::open(&self.app.database_path())?;
        store.ensure_metadata_table()?;
        store.provision(schema)?;

        let unique_keys = &descriptor.validation.unique_keys;
        let record_count = if unique_keys.is_empty() {
            store.append(schema, &rows)?
        } else {
            store.upsert(schema, &rows, unique_keys)?
        };

        tracing::info!("💾 Step 4: exporting to Parquet");
        let parquet_path = export_parquet(
            schema,
            &rows,
            &entry.dataset_id,
            &self.app.processed_data_dir(),
        )?;

        // The ledger only records success once the export has landed.
        store.update_metadata(
            &entry.dataset_id,
            &entry.name,
            &entry.table_name,
            record_count,
            "success",
        )?;
        store.close()?;

        tracing::info!("✅ Ingestion completed: {}", entry.name);
        tracing::info!("   Records written: {}", record_count);
        tracing::info!("   Table: {}", entry.table_name);
        tracing::info!("   Parquet: {}", parquet_path.display());

        Ok(IngestReport {
            dataset_key: key.to_string(),
            dataset_name: entry.name.clone(),
            table_name: entry.table_name.clone(),
            record_count,
            parquet_path: Some(parquet_path),
            dry_run: false,
            skipped: false,
        })
    }

    /// Run every enabled dataset sequentially. One dataset failing does
    /// not stop the rest; the outcome list carries every result.
    pub async fn ingest_all(&self, opts: &IngestOptions) -> Vec<(String, Result<IngestReport>)> {
        let keys = self.registry.enabled_keys();
        tracing::info!("Found {} enabled datasets", keys.len());

        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let outcome = self.ingest_dataset(&key, opts).await;
            if let Err(e) = &outcome {
                tracing::error!("❌ Failed to ingest {}: {}", key, e);
            }
            outcomes.push((key, outcome));
        }

        tracing::info!("Ingestion summary:");
        for (key, outcome) in &outcomes {
            match outcome {
                Ok(report) if report.skipped => tracing::info!("   {}: skipped", key),
                Ok(report) => tracing::info!("   {}: {} records", key, report.record_count),
                Err(e) => tracing::info!("   {}: FAILED ({})", key, e),
            }
        }
        outcomes
    }

    async fn fetch_raw(
        &self,
        entry: &RegistryEntry,
        descriptor: &DatasetDescriptor,
        opts: &IngestOptions,
    ) -> Result<Vec<RawRecord>> {
        if opts.source == SourceMode::File && descriptor.source == SourceKind::PaginatedApi {
            return self.fetch_cached_csv(entry, descriptor, opts.force).await;
        }

        let fetch_opts = FetchOptions {
            force: opts.force,
            filters: opts.filters.clone(),
        };
        let fetcher = self.build_fetcher(entry, descriptor)?;
        fetcher.fetch(&fetch_opts).await
    }

    fn build_fetcher(
        &self,
        entry: &RegistryEntry,
        descriptor: &DatasetDescriptor,
    ) -> Result<Box<dyn Fetch>> {
        match descriptor.source {
            SourceKind::PaginatedApi => {
                let api = descriptor.api.as_ref().ok_or_else(|| IngestError::Config {
                    message: format!("dataset '{}' has no [api] block", entry.dataset_id),
                })?;
                let endpoint = match &api.endpoint {
                    Some(endpoint) => endpoint.clone(),
                    None => format!(
                        "{}/{}/query.json",
                        self.app.api.base_url.trim_end_matches('/'),
                        entry.dataset_id
                    ),
                };
                let token = if self.app.api.token.is_empty() {
                    None
                } else {
                    Some(self.app.api.token.clone())
                };
                Ok(Box::new(PaginatedFetcher::new(
                    endpoint,
                    api.page_size,
                    Duration::from_secs(api.timeout_secs),
                    token,
                )))
            }
            SourceKind::CensusApi => {
                let census = descriptor
                    .census
                    .as_ref()
                    .ok_or_else(|| IngestError::Config {
                        message: format!("dataset '{}' has no [census] block", entry.dataset_id),
                    })?;
                let mut variables: Vec<String> = census.variables.keys().cloned().collect();
                variables.sort();
                Ok(Box::new(CensusFetcher::new(
                    census.year,
                    census.dataset.clone(),
                    census.geography.clone(),
                    variables,
                    descriptor.zip_codes().to_vec(),
                    self.app.api.census_key.clone(),
                )))
            }
            SourceKind::ShapefileDownload => {
                let shapefile = descriptor
                    .shapefile
                    .as_ref()
                    .ok_or_else(|| IngestError::Config {
                        message: format!("dataset '{}' has no [shapefile] block", entry.dataset_id),
                    })?;
                let work_dir = self
                    .app
                    .raw_data_dir()
                    .join("shapefiles")
                    .join(&descriptor.dataset.id);
                let filename = shapefile
                    .filename
                    .clone()
                    .unwrap_or_else(|| "download.shp".to_string());
                Ok(Box::new(ShapefileFetcher::new(
                    shapefile.url.clone(),
                    filename,
                    work_dir,
                )))
            }
            SourceKind::UrlDownload => {
                let url = descriptor.url.as_ref().ok_or_else(|| IngestError::Config {
                    message: format!("dataset '{}' has no [url] block", entry.dataset_id),
                })?;
                Ok(Box::new(UrlFetcher::new(
                    url.url.clone(),
                    url.filename.clone(),
                    self.app.raw_data_dir(),
                )))
            }
        }
    }

    /// File source mode for paginated datasets: reuse (or download once)
    /// the portal's CSV export instead of paging the API.
    async fn fetch_cached_csv(
        &self,
        entry: &RegistryEntry,
        descriptor: &DatasetDescriptor,
        force: bool,
    ) -> Result<Vec<RawRecord>> {
        let api = descriptor.api.as_ref().ok_or_else(|| IngestError::Config {
            message: format!("dataset '{}' has no [api] block", entry.dataset_id),
        })?;
        let csv_url = api.csv_url.as_ref().ok_or_else(|| IngestError::Config {
            message: format!(
                "dataset '{}' has no csv_url, file source mode unavailable",
                entry.dataset_id
            ),
        })?;

        let path = self
            .app
            .raw_data_dir()
            .join(format!("{}.csv", entry.dataset_id));
        if !path.exists() || force {
            tracing::info!("Downloading CSV export from {}", csv_url);
            let client = reqwest::Client::new();
            download_file(&client, csv_url, &path).await?;
        } else {
            tracing::info!("Using cached CSV at {}", path.display());
        }
        load_records(&path)
    }
}

/// Datasets that forbid duplicates collapse repeated keys (last wins)
/// before validation and storage.
fn apply_duplicate_policy(rows: Vec<Row>, validation: &ValidationConfig) -> Vec<Row> {
    if validation.allow_duplicates {
        return rows;
    }
    let before = rows.len();
    let rows = dedupe_last_wins(rows, &validation.unique_keys);
    if rows.len() < before {
        tracing::info!(
            "Dropped {} duplicate rows on ({})",
            before - rows.len(),
            validation.unique_keys.join(", ")
        );
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Value;

    fn row(nta: &str, gap: f64) -> Row {
        let mut row = Row::new();
        row.set("nta_code", Value::Text(nta.to_string()));
        row.set("supply_gap_lbs", Value::Float(gap));
        row
    }

    #[test]
    fn test_duplicate_policy_drops_repeated_keys() {
        let validation = ValidationConfig {
            allow_duplicates: false,
            unique_keys: vec!["nta_code".to_string()],
        };
        let rows = vec![row("BK01", 100.0), row("BK02", 200.0), row("BK01", 300.0)];

        let deduped = apply_duplicate_policy(rows, &validation);

        assert_eq!(deduped.len(), 2);
        // Last occurrence wins, first position is kept.
        assert_eq!(deduped[0].get("supply_gap_lbs"), Some(&Value::Float(300.0)));
        assert_eq!(deduped[1].get("nta_code"), Some(&Value::Text("BK02".to_string())));
    }

    #[test]
    fn test_duplicate_policy_noop_when_allowed() {
        let validation = ValidationConfig::default();
        let rows = vec![row("BK01", 100.0), row("BK01", 300.0)];
        assert_eq!(apply_duplicate_policy(rows, &validation).len(), 2);
    }
}
