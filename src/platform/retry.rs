use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio::time::sleep;

use crate::error::{Result, SeedError};
use crate::logging::{log, obj, v_str, Domain, Level};

/// Backoff schedule for repeated remote checks.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            jitter_factor: 0.3,
        }
    }
}

impl RetryConfig {
    /// Fixed-interval polling that gives up once `timeout` has been spent
    /// waiting.
    pub fn polling(interval: Duration, timeout: Duration) -> Self {
        let interval_ms = interval.as_millis().max(1) as u64;
        let attempts = (timeout.as_millis() as u64 / interval_ms).min(u32::MAX as u64) as u32;
        Self {
            max_retries: attempts,
            base_delay_ms: interval_ms,
            max_delay_ms: interval_ms,
            jitter_factor: 0.0,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * 2.0_f64.powi(attempt.min(32) as i32);
        let clamped = base.min(self.max_delay_ms as f64);

        let jitter_range = clamped * self.jitter_factor;
        let jitter: f64 = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((clamped + jitter).max(0.0) as u64)
    }
}

/// Statuses worth asking again for.
pub fn is_retryable_http_error(status: u16) -> bool {
    matches!(status, 404 | 408 | 429 | 500 | 502 | 503 | 504)
}

/// Network failures, retryable statuses, and "not yet" answers retry;
/// everything else ends the loop.
pub fn is_retryable(err: &SeedError) -> bool {
    match err {
        SeedError::Transport { status: None, .. } => true,
        SeedError::Transport { status: Some(s), .. } => is_retryable_http_error(*s),
        SeedError::Protocol { .. } => true,
        _ => false,
    }
}

/// Run `operation` until it succeeds, the schedule is exhausted, or it
/// fails with an error `should_retry` rejects.
pub async fn retry_async<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: impl Fn(&SeedError) -> bool,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < config.max_retries && should_retry(&e) => {
                let delay = config.delay_for_attempt(attempt);
                log(
                    Level::Debug,
                    Domain::Provision,
                    "retry",
                    obj(&[
                        ("operation", v_str(operation_name)),
                        ("attempt", json!(attempt + 1)),
                        ("of", json!(config.max_retries + 1)),
                        ("delay_ms", json!(delay.as_millis() as u64)),
                        ("msg", v_str(&e.to_string())),
                    ]),
                );
                sleep(delay).await;
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
    use std::sync::Arc;

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter_factor: 0.0,
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(1000));
    }

    #[test]
    fn test_polling_schedule_is_flat() {
        let config = RetryConfig::polling(Duration::from_millis(500), Duration::from_secs(3));
        assert_eq!(config.max_retries, 6);
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(5), Duration::from_millis(500));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&SeedError::transport("x", Some(503), "busy")));
        assert!(is_retryable(&SeedError::transport("x", None, "reset")));
        assert!(!is_retryable(&SeedError::transport("x", Some(401), "denied")));
        assert!(!is_retryable(&SeedError::Config("bad".into())));
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let config = RetryConfig { max_retries: 3, base_delay_ms: 1, ..Default::default() };
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result = retry_async(
            &config,
            "test",
            || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(SeedError::protocol("test", "not yet"))
                    } else {
                        Ok(42)
                    }
                }
            },
            is_retryable,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_immediately() {
        let config = RetryConfig { max_retries: 5, base_delay_ms: 1, ..Default::default() };
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<()> = retry_async(
            &config,
            "test",
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(SeedError::transport("test", Some(403), "forbidden"))
                }
            },
            is_retryable,
        )
        .await;
        assert_eq!(result.unwrap_err().status(), Some(403));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
