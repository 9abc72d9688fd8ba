pub mod ingest;

pub use ingest::{IngestOptions, IngestReport, Pipeline, SourceMode};
