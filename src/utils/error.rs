use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned status {status}: {url}")]
    Upstream { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV processing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid value for {field}: {value} ({reason})")]
    InvalidConfigValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unknown dataset: {key}")]
    UnknownDataset { key: String },

    #[error("Malformed type descriptor '{descriptor}' for column {column}: {reason}")]
    TypeDescriptor {
        column: String,
        descriptor: String,
        reason: String,
    },

    #[error("Schema error in table {table}: {message}")]
    Schema { table: String, message: String },

    #[error("Fetch failed: {message}")]
    Fetch { message: String },

    #[error("Retry budget exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Data processing error: {message}")]
    Processing { message: String },
}

impl IngestError {
    /// Whether a retry against the remote source can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            IngestError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_5xx_is_transient() {
        let err = IngestError::Upstream {
            status: 503,
            url: "https://example.com".to_string(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_upstream_4xx_is_not_transient() {
        let err = IngestError::Upstream {
            status: 404,
            url: "https://example.com".to_string(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_config_error_is_not_transient() {
        let err = IngestError::Config {
            message: "missing table name".to_string(),
        };
        assert!(!err.is_transient());
    }
}
