//! Retry with exponential backoff for transient provider errors
//!
//! Only errors for which `Error::is_retryable()` holds (rate limits) are
//! retried. A server-provided wait wins over the computed backoff.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::AiConfig;
use crate::error::Result;

/// Backoff settings for one operation
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Added on top of a server-provided wait
    pub hint_buffer: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            hint_buffer: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AiConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            ..Self::default()
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Wait before retry number `retry` (0-based): hint + buffer, else base * 2^retry
    pub fn delay_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let delay = match hint {
            Some(hint) => hint.saturating_add(self.hint_buffer),
            None => self
                .base_delay
                .checked_mul(2_u32.saturating_pow(retry))
                .unwrap_or(self.max_delay),
        };
        delay.min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or retries run out
pub async fn retry_async<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && retry < policy.max_retries => {
                let delay = policy.delay_for(retry, e.retry_after());
                warn!(
                    operation = %label,
                    attempt = retry + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            hint_buffer: Duration::from_millis(1),
            max_delay: Duration::from_millis(20),
        }
    }

    fn rate_limited() -> Error {
        Error::RateLimited {
            message: "429".into(),
            retry_after: None,
        }
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0, None), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1, None), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2, None), Duration::from_secs(4));
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(2))),
            Duration::from_millis(2500)
        );
        assert_eq!(policy.delay_for(30, None), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_saturates_on_huge_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0, Some(Duration::MAX)), Duration::from_secs(60));
        assert_eq!(policy.delay_for(u32::MAX, None), Duration::from_secs(60));

        let slow = RetryPolicy {
            base_delay: Duration::from_secs(u64::MAX / 2),
            max_delay: Duration::from_secs(10),
            ..RetryPolicy::default()
        };
        assert_eq!(slow.delay_for(5, None), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retries_rate_limits_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_async(&fast_policy(3), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(rate_limited())
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_async(&fast_policy(2), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(rate_limited())
        })
        .await;

        assert!(matches!(result, Err(Error::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_errors_return_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_async(&fast_policy(3), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::InvalidData("bad request".into()))
        })
        .await;

        assert!(matches!(result, Err(Error::InvalidData(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
