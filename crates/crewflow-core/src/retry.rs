//! Dispatch controls: per-attempt timeout and retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityError, Invocation};
use crate::error::ConfigError;

/// Retry configuration for capability dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts (milliseconds).
    pub backoff_base_ms: u64,
    /// Upper bound on any single backoff delay (milliseconds).
    pub backoff_max_ms: u64,
    /// Wall-clock limit for one attempt; `None` leaves it to the backend.
    pub dispatch_timeout_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            dispatch_timeout_ms: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries `max_retries` times with no delay. Handy in tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
            dispatch_timeout_ms: None,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::InvalidRetryPolicy(format!(
                "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        if self.dispatch_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidRetryPolicy(
                "dispatch_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// The result of a dispatch including every retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub result: Result<Invocation, CapabilityError>,
    /// Number of attempts made (1 = no retries used).
    pub attempts: u32,
}

/// Invoke `call` until it succeeds, fails permanently, or retries run out.
///
/// Transient errors (`Unavailable`, `RateLimited`, `Timeout`) are absorbed
/// here; `on_retry(attempt, error, delay)` is called before each backoff sleep.
/// A rate-limit hint from the backend stretches the delay, still capped by
/// `backoff_max_ms`.
pub async fn dispatch_with_retry<F, Fut, R>(
    policy: &RetryPolicy,
    mut call: F,
    mut on_retry: R,
) -> DispatchOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Invocation, CapabilityError>>,
    R: FnMut(u32, &CapabilityError, Duration),
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match policy.dispatch_timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), call()).await {
                Ok(r) => r,
                Err(_elapsed) => Err(CapabilityError::Timeout { elapsed_ms: ms }),
            },
            None => call().await,
        };

        let err = match result {
            Ok(invocation) => {
                return DispatchOutcome {
                    result: Ok(invocation),
                    attempts: attempt,
                }
            }
            Err(e) => e,
        };

        if !err.is_transient() || attempt >= max_attempts {
            return DispatchOutcome {
                result: Err(err),
                attempts: attempt,
            };
        }

        let mut delay = policy.backoff_for(attempt);
        if let CapabilityError::RateLimited {
            retry_after_ms: Some(hint),
        } = &err
        {
            delay = delay
                .max(Duration::from_millis(*hint))
                .min(Duration::from_millis(policy.backoff_max_ms));
        }
        on_retry(attempt, &err, delay);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn rate_limited() -> CapabilityError {
        CapabilityError::RateLimited {
            retry_after_ms: None,
        }
    }

    #[test]
    fn test_retry_policy_default() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.backoff_base_ms, 500);
        assert_eq!(p.max_attempts(), 4);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 10,
            backoff_base_ms: 100,
            backoff_max_ms: 1000,
            dispatch_timeout_ms: None,
        };
        assert_eq!(p.backoff_for(1), Duration::from_millis(100));
        assert_eq!(p.backoff_for(2), Duration::from_millis(200));
        assert_eq!(p.backoff_for(3), Duration::from_millis(400));
        assert_eq!(p.backoff_for(5), Duration::from_millis(1000));
        assert_eq!(p.backoff_for(64), Duration::from_millis(1000));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff_bounds() {
        let p = RetryPolicy {
            backoff_base_ms: 5000,
            backoff_max_ms: 100,
            ..RetryPolicy::default()
        };
        assert!(matches!(
            p.validate(),
            Err(ConfigError::InvalidRetryPolicy(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_rate_limits_then_success_takes_four_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_retries: 5,
            ..RetryPolicy::default()
        };
        let mut retries = Vec::new();

        let outcome = dispatch_with_retry(
            &policy,
            || {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= 3 {
                        Err(rate_limited())
                    } else {
                        Ok(Invocation::new("done", 10))
                    }
                }
            },
            |attempt, _err, delay| retries.push((attempt, delay)),
        )
        .await;

        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.result.unwrap().text, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            retries,
            vec![
                (1, Duration::from_millis(500)),
                (2, Duration::from_millis(1000)),
                (3, Duration::from_millis(2000)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_error() {
        let policy = RetryPolicy::immediate(2);
        let outcome = dispatch_with_retry(
            &policy,
            || async {
                Err(CapabilityError::Unavailable {
                    detail: "503".to_string(),
                })
            },
            |_, _, _| {},
        )
        .await;
        assert_eq!(outcome.attempts, 3);
        assert!(matches!(
            outcome.result,
            Err(CapabilityError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_response_is_never_retried() {
        let calls = AtomicU32::new(0);
        let outcome = dispatch_with_retry(
            &RetryPolicy::immediate(5),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(CapabilityError::InvalidResponse {
                        detail: "not json".to_string(),
                    })
                }
            },
            |_, _, _| panic!("must not retry"),
        )
        .await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_times_out_and_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_retries: 1,
            backoff_base_ms: 10,
            backoff_max_ms: 10,
            dispatch_timeout_ms: Some(50),
        };
        let outcome = dispatch_with_retry(
            &policy,
            || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok(Invocation::new("second try", 3))
                }
            },
            |_, err, _| assert!(matches!(err, CapabilityError::Timeout { elapsed_ms: 50 })),
        )
        .await;
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_hint_stretches_delay_within_cap() {
        let policy = RetryPolicy {
            max_retries: 1,
            backoff_base_ms: 100,
            backoff_max_ms: 2000,
            dispatch_timeout_ms: None,
        };
        let mut seen = None;
        let calls = AtomicU32::new(0);
        let _ = dispatch_with_retry(
            &policy,
            || {
                let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        Err(CapabilityError::RateLimited {
                            retry_after_ms: Some(9000),
                        })
                    } else {
                        Ok(Invocation::new("ok", 1))
                    }
                }
            },
            |_, _, delay| seen = Some(delay),
        )
        .await;
        assert_eq!(seen, Some(Duration::from_millis(2000)));
    }
}
