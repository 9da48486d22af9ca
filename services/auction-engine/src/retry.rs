//! Retry executor
//!
//! Runs one outbound call under a `RetryPolicy` with a per-attempt
//! timeout. Timeouts and transient errors are retried with doubling
//! backoff; permanent errors return immediately.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};
use types::retry::RetryPolicy;

/// Classifies an upstream error for retry purposes.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Why a retried call finally failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Non-transient error; returned on the attempt it occurred.
    Permanent { error: E, attempts: u32 },
    /// Every allowed attempt failed or timed out.
    Exhausted { last: AttemptFailure<E>, attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Permanent { error, .. } => write!(f, "{}", error),
            RetryError::Exhausted { last, attempts } => {
                write!(f, "gave up after {} attempt(s): {}", attempts, last)
            }
        }
    }
}

/// Outcome of a single failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure<E> {
    TimedOut(Duration),
    Failed(E),
}

impl<E: fmt::Display> fmt::Display for AttemptFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::TimedOut(after) => write!(f, "timed out after {:?}", after),
            AttemptFailure::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy is spent.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    operation: &'static str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut failures = 0u32;

    loop {
        let failure = match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !e.is_transient() => {
                return Err(RetryError::Permanent {
                    error: e,
                    attempts: failures + 1,
                });
            }
            Ok(Err(e)) => AttemptFailure::Failed(e),
            Err(_) => AttemptFailure::TimedOut(timeout),
        };

        failures += 1;
        if failures >= max_attempts {
            error!(
                operation,
                attempts = failures,
                error = %failure,
                "Retries exhausted"
            );
            return Err(RetryError::Exhausted {
                last: failure,
                attempts: failures,
            });
        }

        let delay = policy.delay_after(failures);
        warn!(
            operation,
            attempt = failures,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "Attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
