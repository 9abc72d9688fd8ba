pub mod archive;
pub mod census;
pub mod file;
pub mod paginated;

pub use archive::ShapefileFetcher;
pub use census::CensusFetcher;
pub use file::UrlFetcher;
pub use paginated::PaginatedFetcher;

use crate::utils::error::{IngestError, Result};
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff for transient fetch failures. Rate-limit
/// waits are handled separately and never consume this budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Run `op`, retrying transient failures with the delay doubling each
/// attempt. Non-transient errors propagate immediately; exhausting the
/// budget yields a terminal fetch error.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt + 1 >= policy.max_attempts => {
                return Err(IngestError::RetriesExhausted {
                    attempts: policy.max_attempts,
                    last_error: e.to_string(),
                });
            }
            Err(e) => {
                let wait = policy.base_delay * 2u32.saturating_pow(attempt);
                tracing::warn!("Request failed: {}. Retrying in {:?}", e, wait);
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

/// Map a non-success HTTP status to an error carrying the status code,
/// so 5xx responses stay retryable and 4xx fail fast.
pub(crate) fn check_status(response: &reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(IngestError::Upstream {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    fn transient() -> IngestError {
        IngestError::Upstream {
            status: 503,
            url: "https://example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(20),
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let result = retry_with_backoff(&policy, || {
            let attempts = attempts.clone();
            let calls = calls.clone();
            async move {
                calls.lock().unwrap().push(Instant::now());
                if attempts.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(transient())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);

        // Waits double between attempts, so the gaps strictly increase.
        let calls = calls.lock().unwrap();
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        let third_gap = calls[3] - calls[2];
        assert!(second_gap > first_gap);
        assert!(third_gap > second_gap);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_is_terminal() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<()> = retry_with_backoff(&policy, || {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result.unwrap_err(),
            IngestError::RetriesExhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_non_transient_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<()> = retry_with_backoff(&policy, || {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(IngestError::Upstream {
                    status: 404,
                    url: "https://example.com".to_string(),
                })
            }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result.unwrap_err(), IngestError::Upstream { status: 404, .. }));
    }
}
