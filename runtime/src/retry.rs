//! Bounded exponential backoff for transient store contention.
//!
//! A fulfillment attempt is one store transaction. When the store reports a
//! serialization failure, deadlock, pool timeout or a lost race on the
//! idempotency record ([`StoreError::is_retryable`]) the whole attempt is run
//! again after a delay that doubles from `initial_delay` up to `max_delay`.
//! Re-running an attempt is equivalent to a redelivery of the notification.
//!
//! ```rust
//! use boxoffice_core::StoreError;
//! use boxoffice_runtime::RetryPolicy;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), StoreError> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(50))
//!     .max_delay(Duration::from_secs(2))
//!     .build();
//!
//! let seats = policy.run(move || async move { Ok::<_, StoreError>(42) }).await?;
//! assert_eq!(seats, 42);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use boxoffice_core::StoreError;

use crate::metrics::RetryMetrics;

/// How often and how patiently a transaction is re-run.
///
/// Defaults: 5 retries, 50ms initial delay, 2s cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Start a builder with every field at its default.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self {
                max_retries: 5,
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_secs(2),
            },
        }
    }

    /// Delay before retry number `retry` (0-based): `initial_delay * 2^retry`,
    /// capped at `max_delay`.
    #[must_use]
    pub fn backoff(&self, retry: usize) -> Duration {
        let factor = u32::try_from(retry)
            .ok()
            .and_then(|shift| 1u32.checked_shl(shift));
        factor
            .and_then(|f| self.initial_delay.checked_mul(f))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Runs `attempt` until it succeeds, fails with a non-retryable error,
    /// or the retries are spent.
    ///
    /// # Errors
    ///
    /// The first non-retryable error, or the last retryable one once
    /// `max_retries` retries have failed.
    pub async fn run<F, Fut, T>(&self, mut attempt: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut retry = 0;
        loop {
            match attempt().await {
                Ok(value) => {
                    if retry > 0 {
                        RetryMetrics::record_success();
                        tracing::info!(retries = retry, "Store transaction succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if retry >= self.max_retries => {
                    RetryMetrics::record_exhausted();
                    tracing::error!(retries = retry, error = %err, "Store retries exhausted");
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.backoff(retry);
                    RetryMetrics::record_attempt();
                    tracing::warn!(
                        retry,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Store transaction failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
            }
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Retries after the first attempt.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Cap on any single delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Finish.
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick(max_retries: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(2))
            .build()
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500))
            .build();

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        assert_eq!(policy.backoff(usize::MAX), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn contention_is_retried_until_success() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let result = quick(3)
            .run(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::Transient("could not serialize access".to_string()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn lost_idempotency_race_is_retried() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let result = quick(1)
            .run(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(StoreError::Conflict("duplicate event_id".to_string()))
                } else {
                    Ok(())
                }
            })
            .await;

        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let result: Result<(), _> = quick(2)
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Transient("deadlock detected".to_string()))
            })
            .await;

        assert!(matches!(result, Err(StoreError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn database_faults_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let result: Result<(), _> = RetryPolicy::default()
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Database("relation does not exist".to_string()))
            })
            .await;

        assert!(matches!(result, Err(StoreError::Database(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
