//! Capped exponential backoff for reconnects.

use std::time::Duration;

use peerline_shared::constants::{
    RECONNECT_INITIAL_DELAY_MS, RECONNECT_MAX_ATTEMPTS, RECONNECT_MAX_DELAY_MS,
};

/// Configuration for reconnect behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Consecutive retries before giving up
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(RECONNECT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(RECONNECT_MAX_DELAY_MS),
            max_attempts: RECONNECT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    #[must_use]
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }
}

/// Running backoff state for one connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempts: u32,
    next_delay: Duration,
    policy: BackoffPolicy,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            attempts: 0,
            next_delay: policy.initial_delay,
            policy,
        }
    }

    /// Retries scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    /// Delay before the next retry, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        let delay = self.next_delay;
        self.next_delay = std::cmp::min(delay * 2, self.policy.max_delay);
        Some(delay)
    }

    /// Back to a fresh budget, e.g. after a successful connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_delay = self.policy.initial_delay;
    }
}
