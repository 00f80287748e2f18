//! Bounded retry for collaborator calls.
//!
//! Every HTTP-backed collaborator receives a [`RetryPolicy`] at construction
//! and routes its calls through [`RetryPolicy::run`]. Only transient errors
//! ([`CollaboratorError::is_transient`]) are retried.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::CollaboratorError;

/// Exponential backoff policy with optional jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first call. Zero is treated as one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Add up to 25% random delay on top of each backoff.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the retry that follows attempt number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        let capped = exp.min(self.max_delay_ms);
        let jitter = if self.jitter && capped > 0 {
            rand::thread_rng().gen_range(0..=capped / 4)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, CollaboratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient error"
                    );
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
    use crate::error::Capability;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 300,
            jitter: false,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(300));
        assert_eq!(policy.backoff(40), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 400,
            max_delay_ms: 400,
            jitter: true,
        };
        for _ in 0..20 {
            let d = policy.backoff(0).as_millis();
            assert!((400..=500).contains(&d));
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(CollaboratorError::unavailable(Capability::Generation, "reset"))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempt_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(3)
            .run("down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CollaboratorError::unavailable(Capability::Embedding, "refused"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("auth", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CollaboratorError::rejected(Capability::Generation, "401"))
            })
            .await;
        assert!(matches!(result, Err(CollaboratorError::Rejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
