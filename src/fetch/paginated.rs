use crate::domain::model::{FetchPage, RawRecord};
use crate::domain::ports::{Fetch, FetchOptions};
use crate::fetch::{check_status, retry_with_backoff, RetryPolicy};
use crate::utils::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Fetcher for paginated open-data query APIs (SODA3-style).
///
/// Issues `POST {query, page{pageNumber,pageSize}}` requests and keeps
/// paging while full pages come back; a page shorter than `page_size` is
/// the termination signal. HTTP 429 sleeps for the server-directed
/// duration and re-issues the same page without touching the retry
/// budget; timeouts and 5xx responses are retried with backoff.
pub struct PaginatedFetcher {
    client: Client,
    endpoint: String,
    page_size: usize,
    timeout: Duration,
    api_token: Option<String>,
    retry: RetryPolicy,
}

impl PaginatedFetcher {
    pub fn new(
        endpoint: String,
        page_size: usize,
        timeout: Duration,
        api_token: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            page_size,
            timeout,
            api_token,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch every page for the dataset, optionally narrowed by
    /// equality filters folded into the query's WHERE clause.
    pub async fn fetch_all(
        &self,
        filters: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<Vec<RawRecord>> {
        let query = build_query(filters);
        tracing::info!("Fetching from {} with query: {}", self.endpoint, query);

        let mut records = Vec::new();
        let mut page_number = 1usize;
        loop {
            let page = self.fetch_page(&query, page_number).await?;
            let fetched = page.records.len();
            records.extend(page.records);
            tracing::info!(
                "Fetched {} records from page {} (total: {})",
                fetched,
                page_number,
                records.len()
            );
            if page.exhausted {
                break;
            }
            page_number += 1;
        }

        tracing::info!("Total records fetched: {}", records.len());
        Ok(records)
    }

    async fn fetch_page(&self, query: &str, page_number: usize) -> Result<FetchPage> {
        let body = serde_json::json!({
            "query": query,
            "page": {
                "pageNumber": page_number,
                "pageSize": self.page_size,
            }
        });

        let records = retry_with_backoff(&self.retry, || self.request_page(&body)).await?;
        let exhausted = records.len() < self.page_size;
        Ok(FetchPage { records, exhausted })
    }

    /// One page request. Loops internally on 429 so rate-limit waits do
    /// not count as retry attempts.
    async fn request_page(&self, body: &serde_json::Value) -> Result<Vec<RawRecord>> {
        loop {
            let mut request = self
                .client
                .post(&self.endpoint)
                .json(body)
                .timeout(self.timeout);
            if let Some(token) = &self.api_token {
                request = request.header("X-App-Token", token);
            }

            let response = request.send().await?;
            if response.status().as_u16() == 429 {
                let wait = parse_retry_after(response.headers());
                tracing::warn!("Rate limited; waiting {:?} before retrying the page", wait);
                tokio::time::sleep(wait).await;
                continue;
            }
            check_status(&response)?;

            let payload: serde_json::Value = response.json().await?;
            return Ok(parse_records(payload));
        }
    }
}

#[async_trait]
impl Fetch for PaginatedFetcher {
    async fn fetch(&self, opts: &FetchOptions) -> Result<Vec<RawRecord>> {
        self.fetch_all(opts.filters.as_ref()).await
    }
}

fn build_query(filters: Option<&HashMap<String, serde_json::Value>>) -> String {
    let mut query = "SELECT *".to_string();
    if let Some(filters) = filters {
        let mut clauses: Vec<String> = filters
            .iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(s) => format!("{} = '{}'", key, s.replace('\'', "''")),
                other => format!("{} = {}", key, other),
            })
            .collect();
        clauses.sort();
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
    }
    query
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Duration {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// The API answers either `{"data": [...]}` or a bare array.
fn parse_records(payload: serde_json::Value) -> Vec<RawRecord> {
    let items = match payload {
        serde_json::Value::Object(mut obj) => match obj.remove("data") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                tracing::warn!("Unexpected response object without a data array");
                Vec::new()
            }
        },
        serde_json::Value::Array(items) => items,
        other => {
            tracing::warn!("Unexpected response format: {}", other);
            Vec::new()
        }
    };

    items
        .into_iter()
        .filter_map(|item| match item {
            serde_json::Value::Object(obj) => Some(RawRecord::from_object(obj)),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::IngestError;
    use httpmock::prelude::*;

    fn record_array(count: usize, offset: usize) -> serde_json::Value {
        let items: Vec<serde_json::Value> = (0..count)
            .map(|i| serde_json::json!({"id": offset + i, "year": "2023"}))
            .collect();
        serde_json::Value::Array(items)
    }

    fn fetcher(url: String, page_size: usize) -> PaginatedFetcher {
        PaginatedFetcher::new(url, page_size, Duration::from_secs(5), None).with_retry(
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(5),
            },
        )
    }

    #[tokio::test]
    async fn test_pagination_stops_at_short_page() {
        let server = MockServer::start();
        let page1 = server.mock(|when, then| {
            when.method(POST)
                .path("/query.json")
                .json_body_partial(r#"{"page": {"pageNumber": 1}}"#);
            then.status(200).json_body(record_array(3, 0));
        });
        let page2 = server.mock(|when, then| {
            when.method(POST)
                .path("/query.json")
                .json_body_partial(r#"{"page": {"pageNumber": 2}}"#);
            then.status(200).json_body(record_array(2, 3));
        });

        let fetcher = fetcher(server.url("/query.json"), 3);
        let records = fetcher.fetch_all(None).await.unwrap();

        assert_eq!(records.len(), 5);
        page1.assert_hits(1);
        page2.assert_hits(1);
    }

    #[tokio::test]
    async fn test_empty_first_page_yields_empty_batch() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/query.json");
            then.status(200).json_body(serde_json::json!([]));
        });

        let fetcher = fetcher(server.url("/query.json"), 100);
        let records = fetcher.fetch_all(None).await.unwrap();

        assert!(records.is_empty());
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn test_data_envelope_is_unwrapped() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/query.json");
            then.status(200)
                .json_body(serde_json::json!({"data": [{"id": 1}, {"id": 2}]}));
        });

        let fetcher = fetcher(server.url("/query.json"), 100);
        let records = fetcher.fetch_all(None).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_rate_limited_page_is_reissued_without_spending_retries() {
        let server = MockServer::start();
        let mut limited = server.mock(|when, then| {
            when.method(POST).path("/query.json");
            then.status(429).header("Retry-After", "1");
        });

        let fetcher = fetcher(server.url("/query.json"), 100);
        let handle = tokio::spawn(async move { fetcher.fetch_all(None).await });

        // The first attempt hits the 429 and sleeps out the Retry-After
        // window; swap in a healthy response before it wakes.
        tokio::time::sleep(Duration::from_millis(300)).await;
        limited.assert_hits(1);
        limited.delete();
        let ok = server.mock(|when, then| {
            when.method(POST).path("/query.json");
            then.status(200).json_body(record_array(2, 0));
        });

        let records = handle.await.unwrap().unwrap();
        assert_eq!(records.len(), 2);
        ok.assert_hits(1);
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_retry_budget() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/query.json");
            then.status(503);
        });

        let fetcher = fetcher(server.url("/query.json"), 100);
        let err = fetcher.fetch_all(None).await.unwrap_err();

        assert!(matches!(err, IngestError::RetriesExhausted { attempts: 2, .. }));
        mock.assert_hits(2);
    }

    #[tokio::test]
    async fn test_client_errors_fail_fast() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/query.json");
            then.status(404);
        });

        let fetcher = fetcher(server.url("/query.json"), 100);
        let err = fetcher.fetch_all(None).await.unwrap_err();

        assert!(matches!(err, IngestError::Upstream { status: 404, .. }));
        mock.assert_hits(1);
    }

    #[test]
    fn test_build_query_with_filters() {
        let mut filters = HashMap::new();
        filters.insert("year".to_string(), serde_json::json!(2023));
        filters.insert("nta".to_string(), serde_json::json!("BK0101"));
        let query = build_query(Some(&filters));
        assert_eq!(query, "SELECT * WHERE nta = 'BK0101' AND year = 2023");
    }

    #[test]
    fn test_parse_retry_after_default() {
        let headers = reqwest::header::HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), DEFAULT_RETRY_AFTER);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Duration::from_secs(7));
    }
}
