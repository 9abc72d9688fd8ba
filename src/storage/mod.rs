pub mod database;
pub mod export;
pub mod schema;

pub use database::DataStore;
pub use export::export_parquet;
pub use schema::{ColumnSpec, ColumnType, IndexSpec, TableSchema};
