use crate::domain::model::{RawRecord, Row};
use crate::storage::schema::TableSchema;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Options the orchestrator passes down to a fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Re-download cached artifacts even when present on disk.
    pub force: bool,
    /// Caller-supplied filter overrides (e.g. `{"year": 2023}`).
    pub filters: Option<HashMap<String, serde_json::Value>>,
}

/// A source that can produce the complete raw batch for one dataset.
///
/// Implementations hide pagination, chunking and transient-failure
/// recovery; they either return the full batch or fail with no partial
/// batch handed to the caller.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, opts: &FetchOptions) -> Result<Vec<RawRecord>>;
}

/// Per-dataset transform unit.
///
/// `transform` owns the raw batch and produces rows matching the declared
/// schema's column set; the schema must stay stable for the lifetime of
/// the dataset identifier.
pub trait DatasetTransformer: Send + Sync {
    fn transform(&self, raw: Vec<RawRecord>) -> Result<Vec<Row>>;
    fn schema(&self) -> &TableSchema;
}
