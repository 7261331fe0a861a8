//! Retry policy — explicit value passed into steps that call the provider.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded retry with exponential backoff.
///
/// Passed by value into whichever step performs a provider call, so two
/// concurrent rollouts never share retry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves as one.
    pub max_attempts: u32,
    /// Delay before the first retry. Doubles per attempt.
    pub backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (0-based), or `None`
    /// when the attempts are exhausted.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts.max(1) {
            return None;
        }
        let doubled = self
            .backoff
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(self.max_backoff);
        Some(doubled.min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_after(0), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_after(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_after(3), None);
    }

    #[test]
    fn backoff_caps_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(30),
        };
        assert_eq!(policy.delay_after(3), Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_attempts_behaves_as_one() {
        let policy = RetryPolicy {
            max_attempts: 0,
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        };
        assert_eq!(policy.delay_after(0), None);
    }
}
