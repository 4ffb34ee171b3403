//! Retry scheduling with fixed backoff tiers and escalation
//!
//! The single choke point for external-call failures. Transient failures
//! are retried on a fixed backoff schedule; exhaustion re-classifies them
//! as Critical and signals shutdown. Operational and Critical failures are
//! never retried.

use crate::recovery::{classify, ErrorClass, ErrorRecord, ShutdownCoordinator};
use crate::{ArbitrageError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Default backoff tiers between transient-failure retries
pub const DEFAULT_BACKOFF_SECS: [u64; 3] = [1, 3, 5];

/// Default total attempts per operation
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry engine wrapping every bounded-access-layer and swap call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    backoff_tiers: Vec<Duration>,
    max_attempts: u32,
    shutdown: ShutdownCoordinator,
}

impl RetryPolicy {
    /// Create a policy with the given backoff tiers and default attempt budget.
    /// When attempts outnumber tiers, the last tier repeats.
    pub fn new(backoff_secs: &[u64], max_attempts: u32, shutdown: ShutdownCoordinator) -> Self {
        let tiers = if backoff_secs.is_empty() {
            DEFAULT_BACKOFF_SECS.to_vec()
        } else {
            backoff_secs.to_vec()
        };
        Self {
            backoff_tiers: tiers.into_iter().map(Duration::from_secs).collect(),
            max_attempts: max_attempts.max(1),
            shutdown,
        }
    }

    /// Policy with the default 1s/3s/5s schedule
    pub fn with_defaults(shutdown: ShutdownCoordinator) -> Self {
        Self::new(&DEFAULT_BACKOFF_SECS, DEFAULT_MAX_ATTEMPTS, shutdown)
    }

    /// Configured total attempts per operation
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff applied after the given 1-based attempt number
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let idx = (attempt.saturating_sub(1) as usize).min(self.backoff_tiers.len() - 1);
        self.backoff_tiers[idx]
    }

    /// Execute `op` under this policy, using the configured attempt budget
    pub async fn execute<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_attempts(operation, self.max_attempts, op)
            .await
    }

    /// Execute `op`, retrying Transient failures up to `max_attempts` total
    /// attempts. On exhaustion the failure escalates to Critical and the
    /// shutdown coordinator is signaled.
    pub async fn execute_with_attempts<T, F, Fut>(
        &self,
        operation: &str,
        max_attempts: u32,
        op: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if self.shutdown.is_shutting_down() {
                return Err(ArbitrageError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt - 1,
                }
                .into());
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let record = ErrorRecord::new(&err, operation, attempt);
                    match record.class {
                        ErrorClass::Operational => {
                            warn!(operation = %operation, error = %err, "Operational failure, not retrying");
                            return Err(err);
                        }
                        ErrorClass::Critical => {
                            error!(operation = %operation, error = %err, "Critical failure");
                            self.shutdown.signal_critical(&record.message);
                            return Err(err);
                        }
                        ErrorClass::Transient => {
                            if attempt == max_attempts {
                                error!(
                                    operation = %operation,
                                    attempts = max_attempts,
                                    error = %err,
                                    "Transient failure exhausted retry budget, escalating"
                                );
                                let escalated = ArbitrageError::RetriesExhausted {
                                    operation: operation.to_string(),
                                    attempts: max_attempts,
                                };
                                self.shutdown.signal_critical(&escalated.to_string());
                                return Err(escalated.into());
                            }
                            let backoff = self.backoff_for_attempt(attempt);
                            warn!(
                                operation = %operation,
                                attempt,
                                max_attempts,
                                backoff_secs = backoff.as_secs_f64(),
                                error = %err,
                                "Transient failure, backing off before retry"
                            );
                            // Backoff sleeps observe shutdown: retries are
                            // abandoned, the in-flight call never is.
                            tokio::select! {
                                _ = tokio::time::sleep(backoff) => {}
                                _ = self.shutdown.wait() => {
                                    debug!(operation = %operation, "Shutdown observed during backoff");
                                    return Err(err);
                                }
                            }
                        }
                    }
                }
            }
        }
        unreachable!("retry loop returns on every branch")
    }
}

/// Helper mapping a classified verdict onto the caller's next step.
/// Used when a failure reaches the state machine after the policy has
/// already run.
pub fn is_recoverable(error: &anyhow::Error) -> bool {
    classify(error) != ErrorClass::Critical
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick_policy(shutdown: ShutdownCoordinator) -> RetryPolicy {
        // Zero-length sleeps keep the tests fast; the schedule logic is
        // exercised separately through backoff_for_attempt.
        RetryPolicy::new(&[0, 0, 0], 3, shutdown)
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let policy = quick_policy(ShutdownCoordinator::new());
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result: Result<u32> = policy
            .execute("op", || {
                let calls = calls_ref.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_retries_exactly_max_attempts() {
        let shutdown = ShutdownCoordinator::new();
        let policy = quick_policy(shutdown.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result: Result<u32> = policy
            .execute("op", || {
                let calls = calls_ref.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ArbitrageError::RpcTimeout {
                        method: "dxGetOrder".to_string(),
                    }
                    .into())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = result.unwrap_err();
        assert_eq!(classify(&err), ErrorClass::Critical);
        assert!(shutdown.is_shutting_down());
    }

    #[tokio::test]
    async fn test_operational_not_retried() {
        let shutdown = ShutdownCoordinator::new();
        let policy = quick_policy(shutdown.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result: Result<u32> = policy
            .execute("op", || {
                let calls = calls_ref.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ArbitrageError::OrderRejected("already taken".to_string()).into())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!shutdown.is_shutting_down());
    }

    #[tokio::test]
    async fn test_critical_signals_shutdown_immediately() {
        let shutdown = ShutdownCoordinator::new();
        let policy = quick_policy(shutdown.clone());

        let result: Result<u32> = policy
            .execute("op", || async {
                Err(ArbitrageError::Authentication("bad credentials".to_string()).into())
            })
            .await;

        assert!(result.is_err());
        assert!(shutdown.is_shutting_down());
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let policy = quick_policy(ShutdownCoordinator::new());
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result: Result<&str> = policy
            .execute("op", || {
                let calls = calls_ref.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ArbitrageError::RpcConnection("refused".to_string()).into())
                    } else {
                        Ok("recovered")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_schedule() {
        let policy =
            RetryPolicy::new(&DEFAULT_BACKOFF_SECS, 5, ShutdownCoordinator::new());
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_secs(3));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_secs(5));
        // Last tier repeats past the schedule
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_no_attempts_after_shutdown() {
        let shutdown = ShutdownCoordinator::new();
        shutdown.signal_stop();
        let policy = quick_policy(shutdown);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result: Result<u32> = policy
            .execute("op", || {
                let calls = calls_ref.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
