//! Backoff policy for connect, reconnect and authentication loops

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration_millis;

/// Fixed-interval backoff with an optional attempt ceiling
///
/// Connect and reconnect loops run unbounded (the application has no fallback
/// without the persistent channel); authentication gives up after a few tries.
///
/// # Example
///
/// ```
/// use chatlink::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::fixed(Duration::from_secs(5), 3);
///
/// assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(5));
/// assert!(!policy.has_attempts_remaining(3));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (including the initial one); `None` retries forever
    pub max_attempts: Option<u32>,

    /// Delay interposed before every attempt after the first
    #[serde(with = "duration_millis")]
    pub interval: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_secs(60))
    }
}

impl BackoffPolicy {
    /// Retry forever, sleeping `interval` between attempts
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            max_attempts: None,
            interval,
        }
    }

    /// Retry up to `max_attempts` times in total, sleeping `interval` between attempts
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            interval,
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            interval: Duration::ZERO,
        }
    }

    /// Set the interval between attempts
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Check whether the policy ever gives up
    pub fn is_unbounded(&self) -> bool {
        self.max_attempts.is_none()
    }

    /// Delay to wait before the given attempt (1-based)
    ///
    /// The first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.interval
        }
    }

    /// Check if there are attempts left after `current_attempt` attempts were made
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => current_attempt < max,
            None => true,
        }
    }

    /// Sleep for the delay that precedes `attempt`
    pub async fn wait(&self, attempt: u32) {
        let delay = self.delay_for_attempt(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
