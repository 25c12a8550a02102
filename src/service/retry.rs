//! Retry with exponential backoff for transient store failures.

use crate::config::RetryConfig;
use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt
    pub initial_interval: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub backoff_coefficient: f64,
    /// Upper bound on any single delay
    pub maximum_interval: Duration,
    /// Total attempts, including the first
    pub maximum_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(c: &RetryConfig) -> Self {
        Self {
            initial_interval: Duration::from_millis(c.initial_interval_ms),
            backoff_coefficient: c.backoff_coefficient.max(1.0),
            maximum_interval: Duration::from_millis(c.maximum_interval_ms),
            maximum_attempts: c.maximum_attempts.max(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_coefficient.powi(attempt.saturating_sub(1) as i32);
        let ms = (self.initial_interval.as_millis() as f64 * factor).round();
        Duration::from_millis(ms.min(u64::MAX as f64) as u64).min(self.maximum_interval)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.maximum_attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(what, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_millis(4),
            maximum_attempts: 3,
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let p = fast();
        assert_eq!(p.delay_after(1), Duration::from_millis(1));
        assert_eq!(p.delay_after(2), Duration::from_millis(2));
        assert_eq!(p.delay_after(3), Duration::from_millis(4));
        assert_eq!(p.delay_after(10), Duration::from_millis(4));
    }

    #[tokio::test]
    async fn recovers_from_transient_failure() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out = fast()
            .run("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(EngineError::StoreUnavailable("busy".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(out, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out: Result<()> = fast()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::StoreUnavailable("down".into()))
            })
            .await;
        assert!(matches!(out, Err(EngineError::StoreUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_validation() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out: Result<()> = fast()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Validation("nope".into()))
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
