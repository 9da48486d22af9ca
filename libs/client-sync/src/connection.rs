//! Connection status and reconnect accounting

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use types::retry::RetryPolicy;

/// Transport status as seen by the agent's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    /// Attempt number within the current reconnect cycle (1-based).
    Connecting { attempt: u32 },
    Connected,
    /// Terminal until the owner asks for a retry.
    ReconnectFailed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting { attempt } => write!(f, "connecting (attempt {})", attempt),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::ReconnectFailed => write!(f, "reconnect failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Counts consecutive connection failures against a retry policy.
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    policy: RetryPolicy,
    failures: u32,
}

impl ReconnectTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// The attempt about to be made.
    pub fn next_attempt(&self) -> u32 {
        self.failures + 1
    }

    /// Record a failed attempt. Gives up after exactly `max_attempts`.
    pub fn on_failure(&mut self) -> ReconnectDecision {
        self.failures += 1;
        if self.policy.allows_retry(self.failures) {
            ReconnectDecision::RetryAfter(self.policy.delay_after(self.failures))
        } else {
            ReconnectDecision::GiveUp
        }
    }

    pub fn on_connected(&mut self) {
        self.failures = 0;
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut tracker = ReconnectTracker::new(RetryPolicy::reconnect());
        let delays: Vec<ReconnectDecision> = (0..5).map(|_| tracker.on_failure()).collect();

        assert_eq!(
            delays,
            vec![
                ReconnectDecision::RetryAfter(Duration::from_secs(1)),
                ReconnectDecision::RetryAfter(Duration::from_secs(2)),
                ReconnectDecision::RetryAfter(Duration::from_secs(4)),
                ReconnectDecision::RetryAfter(Duration::from_secs(5)),
                ReconnectDecision::GiveUp,
            ]
        );
    }

    #[test]
    fn test_connect_resets_counter() {
        let mut tracker = ReconnectTracker::new(RetryPolicy::reconnect());
        tracker.on_failure();
        tracker.on_failure();
        assert_eq!(tracker.next_attempt(), 3);

        tracker.on_connected();
        assert_eq!(tracker.next_attempt(), 1);
        assert_eq!(
            tracker.on_failure(),
            ReconnectDecision::RetryAfter(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_status_serializes_with_state_tag() {
        let value = serde_json::to_value(ConnectionStatus::Connecting { attempt: 2 }).unwrap();
        assert_eq!(value["state"], "connecting");
        assert_eq!(value["attempt"], 2);
    }
}
