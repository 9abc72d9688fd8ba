use crate::domain::model::RawRecord;
use crate::domain::ports::{Fetch, FetchOptions};
use crate::fetch::check_status;
use crate::utils::error::{IngestError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};

/// Fetcher for datasets published as a single downloadable file.
///
/// The file is downloaded only when absent from the raw-data directory
/// (or when forced) and then loaded by extension; unrecognized
/// extensions fall back to delimited-text parsing before failing.
pub struct UrlFetcher {
    client: Client,
    url: String,
    filename: Option<String>,
    raw_dir: PathBuf,
}

impl UrlFetcher {
    pub fn new(url: String, filename: Option<String>, raw_dir: PathBuf) -> Self {
        Self {
            client: Client::new(),
            url,
            filename,
            raw_dir,
        }
    }

    fn target_path(&self) -> PathBuf {
        let name = match &self.filename {
            Some(name) => name.clone(),
            None => self
                .url
                .rsplit('/')
                .next()
                .unwrap_or("download")
                .to_string(),
        };
        self.raw_dir.join(name)
    }

    pub async fn fetch_data(&self, force: bool) -> Result<Vec<RawRecord>> {
        let path = self.target_path();
        if !path.exists() || force {
            tracing::info!("Downloading file from {}", self.url);
            download_file(&self.client, &self.url, &path).await?;
            tracing::info!("File downloaded to {}", path.display());
        } else {
            tracing::info!("File found at {}, skipping download", path.display());
        }

        tracing::info!("Loading data from {}", path.display());
        load_records(&path)
    }
}

#[async_trait]
impl Fetch for UrlFetcher {
    async fn fetch(&self, opts: &FetchOptions) -> Result<Vec<RawRecord>> {
        self.fetch_data(opts.force).await
    }
}

/// Download `url` to `path`. A failed download removes any partially
/// written file before the error propagates.
pub(crate) async fn download_file(client: &Client, url: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let result = fetch_to_disk(client, url, path).await;
    if result.is_err() && path.exists() {
        let _ = std::fs::remove_file(path);
    }
    result
}

async fn fetch_to_disk(client: &Client, url: &str, path: &Path) -> Result<()> {
    let response = client.get(url).send().await?;
    check_status(&response)?;
    let mut file = std::fs::File::create(path)?;
    let bytes = response.bytes().await?;
    std::io::copy(&mut bytes.as_ref(), &mut file)?;
    Ok(())
}

/// Load a local file into raw records based on its extension.
pub(crate) fn load_records(path: &Path) -> Result<Vec<RawRecord>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match extension.as_str() {
        "csv" => load_csv(path),
        "json" => load_json(path),
        other => {
            tracing::warn!(
                "Unrecognized extension '{}', attempting delimited-text parse",
                other
            );
            load_csv(path).map_err(|_| IngestError::Processing {
                message: format!("Unsupported file format for {}", path.display()),
            })
        }
    }
}

fn load_csv(path: &Path) -> Result<Vec<RawRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let mut records = Vec::new();
    for result in reader.records() {
        let string_record = result?;
        let mut record = RawRecord::new();
        for (header, field) in headers.iter().zip(string_record.iter()) {
            record.data.insert(
                header.to_string(),
                serde_json::Value::String(field.to_string()),
            );
        }
        records.push(record);
    }
    tracing::info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

fn load_json(path: &Path) -> Result<Vec<RawRecord>> {
    let file = std::fs::File::open(path)?;
    let payload: serde_json::Value = serde_json::from_reader(std::io::BufReader::new(file))?;
    match payload {
        serde_json::Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::Object(obj) => Some(RawRecord::from_object(obj)),
                _ => None,
            })
            .collect()),
        _ => Err(IngestError::Processing {
            message: format!("Expected a JSON array of objects in {}", path.display()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use tempfile::TempDir;

    const CSV_BODY: &str = "zip_code,rent_index\n10001,3500.5\n10002,2900.0\n";

    #[tokio::test]
    async fn test_download_and_parse_csv() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/rents.csv");
            then.status(200).body(CSV_BODY);
        });

        let fetcher = UrlFetcher::new(
            server.url("/rents.csv"),
            None,
            dir.path().to_path_buf(),
        );
        let records = fetcher.fetch_data(false).await.unwrap();

        mock.assert_hits(1);
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].data.get("zip_code"),
            Some(&serde_json::json!("10001"))
        );
    }

    #[tokio::test]
    async fn test_existing_file_skips_download() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("rents.csv"), CSV_BODY).unwrap();

        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/rents.csv");
            then.status(200).body(CSV_BODY);
        });

        let fetcher = UrlFetcher::new(
            server.url("/rents.csv"),
            Some("rents.csv".to_string()),
            dir.path().to_path_buf(),
        );
        let records = fetcher.fetch_data(false).await.unwrap();

        mock.assert_hits(0);
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_force_redownloads() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("rents.csv"), "zip_code\nstale\n").unwrap();

        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/rents.csv");
            then.status(200).body(CSV_BODY);
        });

        let fetcher = UrlFetcher::new(
            server.url("/rents.csv"),
            Some("rents.csv".to_string()),
            dir.path().to_path_buf(),
        );
        let records = fetcher.fetch_data(true).await.unwrap();

        mock.assert_hits(1);
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_partial_file() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/rents.csv");
            then.status(404);
        });

        let fetcher = UrlFetcher::new(
            server.url("/rents.csv"),
            Some("rents.csv".to_string()),
            dir.path().to_path_buf(),
        );
        assert!(fetcher.fetch_data(false).await.is_err());
        assert!(!dir.path().join("rents.csv").exists());
    }

    #[test]
    fn test_load_json_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"[{"zip_code": "10001"}, {"zip_code": "10002"}]"#).unwrap();

        let records = load_records(&path).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_unknown_extension_falls_back_to_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, CSV_BODY).unwrap();

        let records = load_records(&path).unwrap();
        assert_eq!(records.len(), 2);
    }
}
