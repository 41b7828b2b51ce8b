//! Host-driven retries.
//!
//! The coordinator never retries on its own. Hosts that want to ride out
//! transient rejections or timeouts wrap a call in [`with_retry`].

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::config::EngineConfig;
use crate::error::Result;

/// Attempt budget and linear backoff step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Zero behaves like one.
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `base_delay * n`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Policy from `retry_attempts` and `retry_delay_ms`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts,
            base_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. Returns the last error in the latter cases.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !err.is_retryable() || attempt >= policy.max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    code = err.code(),
                    "retry.scheduled"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let value = with_retry(policy(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(QueryError::PoolExhausted { max: 1 })
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_at_budget_and_on_permanent_errors() {
        let calls = AtomicU32::new(0);
        let err = with_retry(policy(2), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(QueryError::Timeout { timeout_ms: 5 })
        })
        .await
        .unwrap_err();
        assert!(matches!(err, QueryError::Timeout { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        calls.store(0, Ordering::SeqCst);
        let err = with_retry(policy(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(QueryError::execution("syntax"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.code(), "ExecutionError");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy::from_config(&EngineConfig::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
    }
}
