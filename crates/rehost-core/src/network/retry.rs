//! Retry policy with exponential backoff.
//!
//! A [`RetryPolicy`] bundles the attempt bound, the backoff schedule and the
//! predicate deciding which errors deserve another attempt, so every fetch
//! call site retries the same way.

use crate::error::RehostError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Exponential base (2.0 doubles each retry).
    pub exponential_base: f64,
    /// Whether to scale delays by a random factor in `0.5..1.5`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after the given failed attempt (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.exponential_base.powi(attempt as i32);
        let capped_secs =
            (self.base_delay.as_secs_f64() * multiplier).min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            let factor = rand::rng().random_range(0.5..1.5);
            (capped_secs * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }
}

/// Outcome bookkeeping for one retried operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub attempts: u32,
    pub total_delay: Duration,
    pub success: bool,
    pub last_error: Option<String>,
}

/// Backoff schedule plus retryable-error predicate.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    should_retry: fn(&RehostError) -> bool,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Policy retrying transient fetch failures (connection errors, 5xx, 408, 429).
    pub fn transient_fetch(config: RetryConfig) -> Self {
        Self {
            config,
            should_retry: RehostError::is_retryable,
        }
    }

    /// Policy with a custom retry predicate.
    pub fn with_predicate(config: RetryConfig, should_retry: fn(&RehostError) -> bool) -> Self {
        Self {
            config,
            should_retry,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<F, Fut, T>(&self, operation: F) -> (Result<T, RehostError>, RetryStats)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RehostError>>,
    {
        retry_async(&self.config, operation, self.should_retry).await
    }
}

/// Retry an async operation with exponential backoff.
///
/// Returns the final result together with attempt statistics.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut stats = RetryStats::default();
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        stats.attempts = attempt + 1;

        let err = match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!("Operation succeeded after {} attempts", attempt + 1);
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };

        stats.last_error = Some(err.to_string());

        if !should_retry(&err) {
            debug!("Error is not retryable: {}", err);
            return (Err(err), stats);
        }

        if attempt + 1 >= max_attempts {
            warn!(
                "All {} attempts exhausted. Last error: {}",
                max_attempts, err
            );
            return (Err(err), stats);
        }

        let delay = config.calculate_delay(attempt);
        stats.total_delay += delay;
        warn!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            attempt + 1,
            max_attempts,
            err,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(attempts: u32) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(attempts)
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[test]
    fn test_delay_calculation_no_jitter() {
        let config = RetryConfig::new()
            .with_base_delay(Duration::from_secs(1))
            .with_jitter(false);

        assert_eq!(config.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(config.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(config.calculate_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_base_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(30))
            .with_jitter(false);

        assert_eq!(config.calculate_delay(3), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_with_jitter_stays_in_band() {
        let config = RetryConfig::new()
            .with_base_delay(Duration::from_secs(2))
            .with_jitter(true);

        for _ in 0..20 {
            let delay = config.calculate_delay(0);
            assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3));
        }
    }

    #[tokio::test]
    async fn test_policy_retries_server_errors_then_succeeds() {
        let policy = RetryPolicy::transient_fetch(fast_config(3));
        let counter = Arc::new(AtomicU32::new(0));

        let (result, stats) = policy
            .run(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(RehostError::HttpStatus {
                            url: "u".into(),
                            status: 502,
                        })
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(stats.attempts, 3);
        assert!(stats.success);
    }

    #[tokio::test]
    async fn test_policy_does_not_retry_not_found() {
        let policy = RetryPolicy::transient_fetch(fast_config(5));

        let (result, stats) = policy
            .run(|| async {
                Err::<(), _>(RehostError::HttpStatus {
                    url: "u".into(),
                    status: 404,
                })
            })
            .await;

        assert!(result.unwrap_err().is_permanent_missing());
        assert_eq!(stats.attempts, 1);
    }

    #[tokio::test]
    async fn test_policy_exhausts_attempts() {
        let policy = RetryPolicy::transient_fetch(fast_config(3));

        let (result, stats) = policy
            .run(|| async {
                Err::<(), _>(RehostError::Network {
                    url: "u".into(),
                    message: "connection refused".into(),
                    source: None,
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(stats.attempts, 3);
        assert!(!stats.success);
        assert!(stats.last_error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_custom_predicate() {
        let policy = RetryPolicy::with_predicate(fast_config(4), |_| false);
        let (result, stats) = policy
            .run(|| async {
                Err::<(), _>(RehostError::HttpStatus {
                    url: "u".into(),
                    status: 503,
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(stats.attempts, 1);
    }
}
