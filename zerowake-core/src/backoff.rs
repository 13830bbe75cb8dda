// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Exponential backoff with jitter for orchestration API calls.
//!
//! Only transient failures are retried. Permanent failures (rejections,
//! not-found) are returned on the first attempt.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::OrchestrationError;

/// Retry policy: `initial * 2^attempt`, capped at `max`, plus up to 10% jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max: max.max(initial),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Delay before retry number `attempt`, with jitter. Never exceeds `max`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter_range = (base.as_millis() as u64 / 10).max(1);
        let jitter = Duration::from_millis(rand::random::<u64>() % jitter_range);
        (base + jitter).min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(30), 8)
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
pub async fn retry_transient<T, F, Fut>(
    policy: &BackoffPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T, OrchestrationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OrchestrationError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts() => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying transient orchestration failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Like [`retry_transient`], but gives up once `deadline` would be crossed.
/// Each attempt is itself bounded by the remaining time.
pub async fn retry_until<T, F, Fut>(
    policy: &BackoffPolicy,
    operation: &'static str,
    deadline: Instant,
    mut op: F,
) -> Result<T, OrchestrationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OrchestrationError>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout_at(deadline, op()).await {
            Ok(result) => result,
            Err(_) => {
                return Err(OrchestrationError::Transient {
                    operation,
                    reason: "deadline elapsed".to_string(),
                })
            }
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                let delay = policy.delay_for(attempt);
                if Instant::now() + delay >= deadline {
                    return Err(e);
                }
                tracing::debug!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying transient orchestration failure before deadline"
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

    fn transient() -> OrchestrationError {
        OrchestrationError::Transient {
            operation: "test",
            reason: "flaky".to_string(),
        }
    }

    #[test]
    fn test_exponential_growth_capped() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 10);
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(800));
        assert_eq!(policy.base_delay(4), Duration::from_secs(1));
        assert_eq!(policy.base_delay(40), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 10);
        for attempt in 0..8 {
            let delay = policy.delay_for(attempt);
            let base = policy.base_delay(attempt);
            assert!(delay >= base);
            assert!(delay <= Duration::from_secs(1));
            assert!(delay <= base + base / 10 + Duration::from_millis(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_eventually_succeeds() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(50), 5);
        let calls = AtomicU32::new(0);

        let result = retry_transient(&policy, "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_gives_up() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(50), 3);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_transient(&policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let policy = BackoffPolicy::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_transient(&policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(OrchestrationError::Rejected {
                operation: "test",
                reason: "forbidden".to_string(),
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_respects_deadline() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 100);
        let start = Instant::now();
        let deadline = start + Duration::from_millis(500);

        let result: Result<(), _> =
            retry_until(&policy, "test", deadline, || async { Err(transient()) }).await;

        assert!(result.is_err());
        assert!(Instant::now() <= deadline);
    }
}
