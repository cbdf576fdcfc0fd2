//! Exponential-backoff retry with attempt recording.
//!
//! [`retry`] runs a fallible async operation up to `max_attempts` times.
//! Failures are classified into a [`FailoverReason`]; only retryable
//! reasons (auth, rate-limit, timeout) are retried, with delay
//! `min(base_delay * 2^(attempt-1), max_delay)`. Every failed attempt is
//! recorded; cancellation aborts the wait immediately.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classify::{FailoverReason, classify_error};
use crate::error::{ProviderError, Result};

/// Retry behaviour configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (default: 3).
    pub max_attempts: u32,

    /// Base delay before the first retry (default: 1s).
    pub base_delay: Duration,

    /// Cap on the computed delay (default: 10s).
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Record of one failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u32,

    /// Classified failure reason.
    pub reason: FailoverReason,

    /// The error text.
    pub error: String,

    /// Delay scheduled before the next attempt (zero on the final one).
    pub delay: Duration,
}

/// Result of a retried operation plus its failure history.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The final result.
    pub result: Result<T>,

    /// One record per failed attempt; successes are not recorded.
    pub attempts: Vec<RetryAttempt>,
}

/// Callback invoked before each retry sleep: `(attempt, error, delay)`.
pub type OnRetry<'a> = &'a (dyn Fn(u32, &ProviderError, Duration) + Send + Sync);

/// Compute the delay before the retry following attempt `attempt` (1-based).
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base_ms = config.base_delay.as_millis() as u64;
    let capped = base_ms
        .saturating_mul(exp)
        .min(config.max_delay.as_millis() as u64);
    Duration::from_millis(capped)
}

/// Classify a typed provider error into a [`FailoverReason`].
///
/// Typed variants map directly; opaque variants fall back to the
/// substring classifier.
pub fn reason_for(err: &ProviderError) -> FailoverReason {
    match err {
        ProviderError::AuthFailed(_) => FailoverReason::Auth,
        ProviderError::RateLimited { .. } => FailoverReason::RateLimit,
        ProviderError::Timeout => FailoverReason::Timeout,
        ProviderError::Billing(_) => FailoverReason::Billing,
        ProviderError::ContextOverflow(_) => FailoverReason::ContextOverflow,
        ProviderError::Cancelled => FailoverReason::Unknown,
        other => classify_error(&other.to_string()),
    }
}

/// Run `op` with the default callback-free policy. See [`retry_with_callback`].
pub async fn retry<T, Op, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    op: Op,
) -> RetryOutcome<T>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_callback(config, cancel, op, None).await
}

/// Run `op` up to `config.max_attempts` times.
///
/// A successful call returns immediately; an operation that never fails
/// is called exactly once and records zero attempts. Non-retryable
/// failures and exhausted budgets return the last error. When `cancel`
/// fires during a backoff sleep the outcome is
/// [`ProviderError::Cancelled`] without further attempts.
pub async fn retry_with_callback<T, Op, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut op: Op,
    on_retry: Option<OnRetry<'_>>,
) -> RetryOutcome<T>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempts = Vec::new();

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return RetryOutcome {
                result: Err(ProviderError::Cancelled),
                attempts,
            };
        }

        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retry");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(err) => {
                let reason = reason_for(&err);
                let last = attempt == max_attempts;
                let delay = if last {
                    Duration::ZERO
                } else {
                    compute_delay(config, attempt)
                };

                attempts.push(RetryAttempt {
                    attempt,
                    reason,
                    error: err.to_string(),
                    delay,
                });

                if !reason.is_retryable() || last {
                    return RetryOutcome {
                        result: Err(err),
                        attempts,
                    };
                }

                warn!(
                    attempt,
                    reason = %reason,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient failure"
                );

                if let Some(cb) = on_retry {
                    cb(attempt, &err, delay);
                }

                tokio::select! {
                    _ = cancel.cancelled() => {
                        return RetryOutcome {
                            result: Err(ProviderError::Cancelled),
                            attempts,
                        };
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    // max_attempts >= 1, so the loop always returns above.
    RetryOutcome {
        result: Err(ProviderError::RequestFailed(
            "retry loop exhausted without result".into(),
        )),
        attempts,
    }
}
