//! Retrying gateway for external calls
//!
//! Both unreliable collaborators — the summarizer and the document
//! store — are invoked through this wrapper. It gives any external
//! call bounded-retry-with-backoff semantics: up to `max_attempts`
//! tries, exponential backoff between them, and a per-attempt timeout
//! that is distinct from any conversational timeout and counts
//! against the retry budget.
//!
//! Only transient failures (timeouts, rate limiting, 5xx-equivalents)
//! are retried. Permanent failures (auth, malformed request) return
//! immediately. Exhaustion becomes [`GatewayError::Exhausted`]; the
//! gateway never swallows an outcome, so the caller always gets the
//! chance to preserve the user's data on its failure path.

use crate::errors::{CallError, GatewayError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy for one gateway instance.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts, first try included. At least 1.
    pub max_attempts: u32,
    /// Backoff before attempt n+1 is `base_delay * 2^n`.
    pub base_delay: Duration,
    /// Budget for a single attempt; overruns count as transient.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(retry: &crate::config::RetryConfig) -> Self {
        Self {
            max_attempts: retry.max_attempts.max(1),
            base_delay: Duration::from_millis(retry.base_delay_ms),
            attempt_timeout: Duration::from_secs(retry.attempt_timeout_secs),
        }
    }
}

/// Generic bounded-retry wrapper around one external invocation.
#[derive(Debug, Clone, Copy)]
pub struct Gateway {
    policy: RetryPolicy,
}

impl Gateway {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Invoke `op` under the retry policy. `label` names the call in logs.
    pub async fn call<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut last = String::new();

        for attempt in 0..self.policy.max_attempts {
            match tokio::time::timeout(self.policy.attempt_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if !err.is_transient() => {
                    warn!(call = label, attempt, error = %err, "permanent failure, not retrying");
                    return Err(GatewayError::Permanent(err.to_string()));
                }
                Ok(Err(err)) => {
                    warn!(call = label, attempt, error = %err, "transient failure");
                    last = err.to_string();
                }
                Err(_) => {
                    warn!(
                        call = label,
                        attempt,
                        timeout = ?self.policy.attempt_timeout,
                        "attempt timed out"
                    );
                    last = format!("attempt timed out after {:?}", self.policy.attempt_timeout);
                }
            }

            if attempt + 1 < self.policy.max_attempts {
                let delay = self.policy.base_delay * 2u32.saturating_pow(attempt);
                tokio::time::sleep(delay).await;
            }
        }

        Err(GatewayError::Exhausted {
            attempts: self.policy.max_attempts,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let gateway = Gateway::new(fast_policy());
        let calls = AtomicU32::new(0);

        let result = gateway
            .call("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, CallError>(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let gateway = Gateway::new(fast_policy());
        let calls = AtomicU32::new(0);

        let result = gateway
            .call("op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(CallError::Transient("rate limited".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_fails_without_retry() {
        let gateway = Gateway::new(fast_policy());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = gateway
            .call("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::Permanent("bad auth".into())) }
            })
            .await;

        assert!(matches!(result, Err(GatewayError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_budget() {
        let gateway = Gateway::new(fast_policy());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = gateway
            .call("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::Transient("timeout".into())) }
            })
            .await;

        match result {
            Err(GatewayError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.contains("timeout"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_counts_toward_budget() {
        let gateway = Gateway::new(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            attempt_timeout: Duration::from_millis(50),
        });
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = gateway
            .call("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            })
            .await;

        match result {
            Err(GatewayError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert!(last.contains("timed out"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
