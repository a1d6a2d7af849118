//! Exponential backoff between fetch attempts

use crate::config::FetchConfig;
use std::time::Duration;

/// Retry budget and delay curve for transient fetch failures
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Ceiling on any single delay
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay to sleep after the given failed attempt (0-based)
    ///
    /// Doubles per attempt from the base delay, capped at the ceiling. The
    /// shift saturates, so large attempt indexes cannot overflow.
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt_index).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_delay_is_base() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(250));
    }

    #[test]
    fn test_delays_double() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
        // Shift amounts past u32 range saturate instead of overflowing
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[test]
    fn test_delays_never_decrease() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..16 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn test_from_config() {
        let config = FetchConfig {
            max_attempts: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 2000,
            ..FetchConfig::default()
        };
        let policy = BackoffPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(2));
    }
}
