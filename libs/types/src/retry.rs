//! Retry/backoff policy shared by every component that retries
//!
//! One policy object (max attempts, base delay, cap) parameterized per
//! call site: metadata fetches, ledger reads and client reconnection.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after each further failure.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Content store reads: 3 attempts, 1s doubling, capped at 5s.
    pub const fn content_fetch() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(5))
    }

    /// Ledger reads fall back quickly; the view degrades instead of failing.
    pub const fn ledger_read() -> Self {
        Self::new(2, Duration::from_millis(500), Duration::from_secs(2))
    }

    /// Broker reconnection: 5 attempts, 1s doubling, capped at 5s.
    pub const fn reconnect() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(5))
    }

    /// Delay to wait after `failures` consecutive failures (1-based).
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Whether another attempt is allowed after `failures` failures.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::content_fetch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::reconnect();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
        assert_eq!(policy.delay_after(40), Duration::from_secs(5));
    }

    #[test]
    fn test_allows_retry_bounded() {
        let policy = RetryPolicy::content_fetch();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }
}
