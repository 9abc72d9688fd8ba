//! Batch ingestion pipeline for tabular and geospatial open data.
//!
//! Datasets are declared in TOML, fetched from paginated portals,
//! chunked census endpoints, shapefile archives or plain files,
//! transformed into canonical rows and written to a schema-driven
//! relational store with a Parquet export per run.

pub mod app;
pub mod config;
pub mod datasets;
pub mod domain;
pub mod fetch;
pub mod storage;
pub mod transform;
pub mod utils;

pub use app::{IngestOptions, IngestReport, Pipeline, SourceMode};
pub use config::dataset::{DatasetDescriptor, DatasetRegistry, SourceKind};
pub use config::AppConfig;
pub use domain::{DatasetTransformer, Fetch, FetchOptions, RawRecord, Row, Value};
pub use storage::{export_parquet, DataStore};
pub use utils::error::{IngestError, Result};
