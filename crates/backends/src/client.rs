//! Shared HTTP plumbing: client construction and the transient-retry loop.

use crate::error::{BackendError, Result};
use std::future::Future;
use std::time::Duration;

/// Extra attempts after the first failure.
const MAX_RETRIES: u32 = 2;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Build the shared reqwest client. Honors `HTTP_PROXY` and an optional
/// request timeout from `API_TIMEOUT_MS`.
pub fn build_http_client() -> std::result::Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));

    if let Ok(proxy_url) = std::env::var("HTTP_PROXY") {
        if let Ok(proxy) = reqwest::Proxy::all(&proxy_url) {
            builder = builder.proxy(proxy);
        }
    }

    let timeout_ms = std::env::var("API_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(120_000);
    builder = builder.timeout(Duration::from_millis(timeout_ms));

    builder.build()
}

/// Exponential backoff delay for retry attempt `attempt` (0-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(2u32.saturating_pow(attempt));
    exp.min(BACKOFF_CAP)
}

/// Run `op` with up to two retries on transient failures. Permanent
/// failures return immediately.
pub async fn with_retries<T, F, Fut>(label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                let delay = backoff_delay(attempt);
                log::warn!(
                    "{label}: transient failure (attempt {}), retrying in {}ms: {e}",
                    attempt + 1,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(4), Duration::from_secs(5));
        assert_eq!(backoff_delay(10), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_twice_then_surface() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BackendError::transient(Some(503), "down")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BackendError::permanent(Some(401), "no auth")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    Err(BackendError::transient(None, "reset"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
