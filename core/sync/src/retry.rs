//! Quota-aware retry with exponential backoff.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use vitalsync_common::{Error, Result};

use crate::quota::QuotaTracker;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Set initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // Add random jitter of +/- 25%, still capped
            let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
            (capped_delay * jitter_factor).min(self.max_delay.as_millis() as f64)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Runs one remote call under quota admission and retry policy.
///
/// Every attempt, successful or not, consumes one unit of quota.
/// Throttled and transient failures are retried; anything else is
/// surfaced on first occurrence.
pub struct ResilientExecutor {
    config: RetryConfig,
    quota: Option<Arc<QuotaTracker>>,
}

impl ResilientExecutor {
    /// Create an executor without quota tracking.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            quota: None,
        }
    }

    /// Create an executor that consults `quota` before each attempt.
    pub fn with_quota(config: RetryConfig, quota: Arc<QuotaTracker>) -> Self {
        Self {
            config,
            quota: Some(quota),
        }
    }

    /// Get the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Get the quota tracker, if any.
    pub fn quota(&self) -> Option<&Arc<QuotaTracker>> {
        self.quota.as_ref()
    }

    /// Ask the tracker for one unit of budget.
    ///
    /// A denial becomes a throttling error carrying the wait until reset.
    fn admit(&self) -> Result<()> {
        let Some(quota) = &self.quota else {
            return Ok(());
        };

        let now = Utc::now();
        if quota.try_acquire_at(now) {
            return Ok(());
        }

        let status = quota.status_at(now);
        Err(Error::Throttled {
            message: format!("Local quota of {} requests exhausted", status.limit),
            retry_after: Some(quota.time_until_reset_at(now)),
            reset_at: Some(status.reset_at),
        })
    }

    /// Execute an operation with admission control and retry logic.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            let outcome = match self.admit() {
                Ok(()) => operation().await,
                Err(denied) => Err(denied),
            };

            let err = match outcome {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            if let (Some(quota), Some(reset_at)) = (&self.quota, err.reset_at()) {
                quota.adopt_reset_time(reset_at);
            }

            attempt += 1;
            if attempt > self.config.max_retries {
                warn!(
                    "Operation failed after {} attempts: {}",
                    attempt, err
                );
                return Err(err);
            }

            let mut delay = self.config.delay_for_attempt(attempt - 1);
            if let Some(hint) = err.retry_after() {
                if hint > self.config.max_delay {
                    // Waiting out the hint would exceed the cap; retrying sooner is pointless
                    warn!("Throttled for {:?}, longer than max delay; giving up: {}", hint, err);
                    return Err(err);
                }
                delay = delay.max(hint);
            }

            warn!(
                "Attempt {} failed: {}. Retrying in {:?}...",
                attempt, err, delay
            );
            sleep(delay).await;
        }
    }
}

impl Default for ResilientExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::QuotaConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig::new(max_retries)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(20))
    }

    #[test]
    fn test_retry_config_delay_calculation() {
        let config = RetryConfig::new(3)
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn test_max_delay_cap() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(true);

        for attempt in 0..10 {
            assert!(config.delay_for_attempt(attempt) <= Duration::from_secs(10));
        }
        assert_eq!(
            config.clone().with_jitter(false).delay_for_attempt(8),
            Duration::from_secs(10)
        );
    }

    #[tokio::test]
    async fn test_successful_operation() {
        let executor = ResilientExecutor::default();
        let result: Result<i32> = executor.execute(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_on_transient_and_throttled() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let executor = ResilientExecutor::new(fast(3));

        let result: Result<&str> = executor
            .execute(move || {
                let count = counter.clone();
                async move {
                    match count.fetch_add(1, Ordering::SeqCst) {
                        0 => Err(Error::Transient("503".to_string())),
                        1 => Err(Error::throttled("429")),
                        2 => Err(Error::Timeout("read".to_string())),
                        _ => Ok("done"),
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let executor = ResilientExecutor::new(fast(5));

        let result: Result<()> = executor
            .execute(move || {
                let count = counter.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Unauthorized("steps".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Unauthorized(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_retries_exceeded_surfaces_last_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let executor = ResilientExecutor::new(fast(2));

        let result: Result<()> = executor
            .execute(move || {
                let count = counter.clone();
                async move {
                    let n = count.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Transient(format!("failure {}", n)))
                }
            })
            .await;

        // Initial + 2 retries = 3 attempts
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match result {
            Err(Error::Transient(msg)) => assert_eq!(msg, "failure 2"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_attempts_consume_quota() {
        let quota = Arc::new(QuotaTracker::new(QuotaConfig::new(100)));
        let executor = ResilientExecutor::with_quota(fast(2), quota.clone());

        let _: Result<()> = executor
            .execute(|| async { Err(Error::Transient("down".to_string())) })
            .await;

        assert_eq!(quota.window().used, 3);
    }

    #[tokio::test]
    async fn test_exhausted_quota_blocks_call() {
        let quota = Arc::new(QuotaTracker::new(QuotaConfig::new(1)));
        quota.record_usage();
        let executor = ResilientExecutor::with_quota(fast(3), quota);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = executor
            .execute(move || {
                let count = counter.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Throttled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_after_hint_beyond_cap_surfaces() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let executor = ResilientExecutor::new(fast(5));

        let result: Result<()> = executor
            .execute(move || {
                let count = counter.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Throttled {
                        message: "slow down".to_string(),
                        retry_after: Some(Duration::from_secs(600)),
                        reset_at: None,
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Throttled { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_reset_time_is_adopted() {
        let quota = Arc::new(QuotaTracker::new(QuotaConfig::new(100)));
        let executor = ResilientExecutor::with_quota(RetryConfig::new(0), quota.clone());
        let reset_at = Utc::now() + chrono::Duration::minutes(7);

        let _: Result<()> = executor
            .execute(move || async move {
                Err(Error::Throttled {
                    message: "quota".to_string(),
                    retry_after: None,
                    reset_at: Some(reset_at),
                })
            })
            .await;

        assert_eq!(quota.window().window_reset_at, Some(reset_at));
    }
}
