use crate::domain::model::RawRecord;
use crate::domain::ports::{Fetch, FetchOptions};
use crate::fetch::check_status;
use crate::utils::error::{IngestError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// URL length limit safety for the statistical API's IN-style filters.
const CHUNK_SIZE: usize = 50;

/// Fetcher for US-Census-style statistical APIs.
///
/// A query names a vintage year, a dataset path and a geography; the
/// caller-supplied key list (zip codes) is partitioned into chunks of
/// [`CHUNK_SIZE`] and one request is issued per chunk. Results are
/// concatenated in chunk order. Responses are positional: the first row
/// is the header list, remaining rows are values zipped onto it.
///
/// A failure on any chunk aborts the whole fetch; these responses are
/// treated as all-or-nothing per run.
pub struct CensusFetcher {
    client: Client,
    year: u16,
    dataset: String,
    geography: String,
    variables: Vec<String>,
    api_key: Option<String>,
    zip_codes: Vec<String>,
    endpoint_override: Option<String>,
    timeout: Duration,
}

impl CensusFetcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        year: u16,
        dataset: String,
        geography: String,
        variables: Vec<String>,
        zip_codes: Vec<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            year,
            dataset,
            geography,
            variables,
            api_key,
            zip_codes,
            endpoint_override: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Point the fetcher at a non-default endpoint (mirrors, tests).
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint_override = Some(endpoint);
        self
    }

    fn base_url(&self) -> String {
        match &self.endpoint_override {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://api.census.gov/data/{}/{}", self.year, self.dataset),
        }
    }

    pub async fn fetch_all(
        &self,
        filters: Option<&std::collections::HashMap<String, serde_json::Value>>,
    ) -> Result<Vec<RawRecord>> {
        // CLI filter overrides take precedence over the configured list.
        let zip_codes: Vec<String> = filters
            .and_then(|f| f.get("zip_codes"))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|z| z.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_else(|| self.zip_codes.clone());

        if zip_codes.is_empty() {
            return Err(IngestError::Config {
                message: "census fetch requires a zip code filter list".to_string(),
            });
        }

        self.fetch_by_chunks(&self.base_url(), &zip_codes).await
    }

    async fn fetch_by_chunks(&self, base_url: &str, zip_codes: &[String]) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        for (index, chunk) in zip_codes.chunks(CHUNK_SIZE).enumerate() {
            tracing::info!("Fetching chunk {} ({} zip codes)", index + 1, chunk.len());
            let chunk_records = self.request_chunk(base_url, chunk).await.map_err(|e| {
                tracing::error!("Failed to fetch chunk {}: {}", index + 1, e);
                e
            })?;
            records.extend(chunk_records);
        }
        Ok(records)
    }

    async fn request_chunk(&self, base_url: &str, chunk: &[String]) -> Result<Vec<RawRecord>> {
        let geo_filter = format!("{}:{}", self.geography, chunk.join(","));
        let mut params: Vec<(&str, String)> = vec![
            ("get", self.variables.join(",")),
            ("for", geo_filter),
        ];
        if let Some(key) = &self.api_key {
            params.push(("key", key.clone()));
        }

        let response = self
            .client
            .get(base_url)
            .query(&params)
            .timeout(self.timeout)
            .send()
            .await?;
        check_status(&response)?;

        let payload: Vec<Vec<serde_json::Value>> = response.json().await?;
        Ok(zip_positional_rows(payload))
    }
}

#[async_trait]
impl Fetch for CensusFetcher {
    async fn fetch(&self, opts: &FetchOptions) -> Result<Vec<RawRecord>> {
        self.fetch_all(opts.filters.as_ref()).await
    }
}

/// First row is the header list; remaining rows are positional values.
fn zip_positional_rows(payload: Vec<Vec<serde_json::Value>>) -> Vec<RawRecord> {
    let mut rows = payload.into_iter();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row
            .into_iter()
            .map(|h| match h {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        None => return Vec::new(),
    };

    rows.map(|values| {
        let mut record = RawRecord::new();
        for (header, value) in headers.iter().zip(values) {
            record.data.insert(header.clone(), value);
        }
        record
    })
    .collect()
}
