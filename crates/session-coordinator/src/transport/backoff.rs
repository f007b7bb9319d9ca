//! Exponential backoff schedule.

use std::time::Duration;

/// Exponential backoff: attempt `n` (1-based) waits `base * 2^(n-1)`.
///
/// No delay is produced past `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_attempts: u32,
}

impl BackoffPolicy {
    #[must_use]
    pub const fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the given attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_from_base() {
        let policy = BackoffPolicy::new(Duration::from_millis(500), 4);

        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(1000)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(2000)));
        assert_eq!(policy.delay_for(4), Some(Duration::from_millis(4000)));
    }

    #[test]
    fn test_no_delay_past_max_attempts() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), 3);
        assert_eq!(policy.delay_for(4), None);
        assert_eq!(policy.delay_for(0), None);
    }

    #[test]
    fn test_large_attempts_saturate() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), u32::MAX);
        assert!(policy.delay_for(40).is_some());
    }
}
