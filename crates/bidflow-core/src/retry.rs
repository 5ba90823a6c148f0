// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! Retry logic with exponential backoff for Stage Runner invocations.
//!
//! Values match spec.md §4.4's retry contract: base delay 1s, multiplier
//! 2.0, cap 60s, jitter in `[0.5x, 1.5x]` of the computed delay, at most 3
//! attempts total (the initial attempt plus two retries).

use crate::error::Result;
use rand::Rng;
use std::time::Duration;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the initial one.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Multiplier for exponential backoff.
    pub multiplier: f64,

    /// Maximum delay between retries.
    pub max_delay: Duration,

    /// Half-width of the jitter window around the computed delay. A value
    /// of `0.5` spreads the actual delay uniformly over `[0.5x, 1.5x]` of
    /// the unjittered value. `0.0` disables jitter.
    pub jitter_half_range: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter_half_range: 0.5,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings and default jitter.
    pub fn new(max_attempts: u32, initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier,
            max_delay,
            jitter_half_range: 0.5,
        }
    }

    /// Creates a retry policy with no retries (a single attempt).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(0),
            multiplier: 1.0,
            max_delay: Duration::from_millis(0),
            jitter_half_range: 0.0,
        }
    }

    /// Creates a retry policy with fixed delays (no exponential backoff).
    pub fn fixed_delay(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
            jitter_half_range: 0.0,
        }
    }

    /// Delay before retrying after the given 0-indexed retry attempt has
    /// failed (`0` is the first retry, following the initial attempt).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt + 1 >= self.max_attempts {
            return Duration::from_millis(0);
        }

        let base_delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let base_delay = Duration::from_millis(base_delay_ms as u64);
        let capped_delay = std::cmp::min(base_delay, self.max_delay);

        if self.jitter_half_range > 0.0 {
            self.add_jitter(capped_delay)
        } else {
            capped_delay
        }
    }

    /// Applies jitter uniformly over `[(1 - half_range)x, (1 + half_range)x]`.
    fn add_jitter(&self, delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();
        let delay_ms = delay.as_millis() as f64;
        let low = 1.0 - self.jitter_half_range;
        let high = 1.0 + self.jitter_half_range;
        let jitter_factor = rng.gen_range(low..=high);
        Duration::from_millis((delay_ms * jitter_factor) as u64)
    }

    /// Returns true if more than one attempt is allowed.
    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1
    }
}

/// Retry executor that runs an async operation under a [`RetryPolicy`].
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Executes an async operation with retries according to the policy.
    ///
    /// The operation is retried if it returns a retryable error
    /// ([`BidflowError::is_retryable`](crate::error::BidflowError::is_retryable))
    /// and the attempt budget is not exhausted.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.execute_with_info(|_attempt| operation()).await
    }

    /// Variant that passes the current 0-indexed attempt number to the operation.
    pub async fn execute_with_info<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation(attempt).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    let exhausted = attempt + 1 >= max_attempts;
                    if exhausted || !err.is_retryable() {
                        return Err(err);
                    }

                    let delay = self.policy.delay_for_attempt(attempt);
                    if delay > Duration::from_millis(0) {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BidflowError, ErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn default_policy_matches_spec_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert_eq!(policy.jitter_half_range, 0.5);
    }

    #[test]
    fn exponential_backoff_without_jitter() {
        let mut policy = RetryPolicy::new(5, Duration::from_secs(1), 2.0, Duration::from_secs(60));
        policy.jitter_half_range = 0.0;

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn caps_at_max_delay() {
        let mut policy = RetryPolicy::new(10, Duration::from_secs(1), 2.0, Duration::from_secs(5));
        policy.jitter_half_range = 0.0;

        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_half_range() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 2.0, Duration::from_secs(60));
        for _ in 0..20 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay.as_millis() >= 500 && delay.as_millis() <= 1500);
        }
    }

    #[test]
    fn no_delay_on_final_attempt() {
        let policy = RetryPolicy::default();
        // max_attempts = 3: attempts 0, 1 get delays, attempt 2 is final, no more retries.
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(0));
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let executor = RetryExecutor::new(RetryPolicy::default());
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = executor
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<i32, BidflowError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_up_to_three_attempts() {
        let mut policy = RetryPolicy::default();
        policy.initial_delay = Duration::from_millis(1);
        policy.max_delay = Duration::from_millis(5);
        let executor = RetryExecutor::new(policy);

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = executor
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    let count = counter.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err(BidflowError::transient("rate limited"))
                    } else {
                        Ok::<i32, BidflowError>(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_at_three_total_attempts() {
        let mut policy = RetryPolicy::default();
        policy.initial_delay = Duration::from_millis(1);
        let executor = RetryExecutor::new(policy);

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = executor
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, BidflowError>(BidflowError::transient("still failing"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_errors() {
        let executor = RetryExecutor::new(RetryPolicy::default());
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = executor
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, BidflowError>(BidflowError::validation("bad input"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind, ErrorKind::Validation);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
