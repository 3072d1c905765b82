//! Reconnect backoff schedules.
//!
//! The connection layer owns its own reconnection (the transport's built-in
//! retry stays disabled), so the delay schedule lives here as data: how long
//! to wait before attempt N, and when to stop trying.
//!
//! # Example
//!
//! ```
//! use turnstile_runtime::backoff::BackoffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::linear(Duration::from_secs(3), 5);
//!
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(3));
//! assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(15));
//! assert!(policy.should_retry(4));
//! assert!(!policy.should_retry(5));
//! ```

use std::time::Duration;

/// How delays grow between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Growth {
    /// `base × attempt` - the reconnect ladder (3 s, 6 s, 9 s, ...)
    Linear,
    /// `base × multiplier^(attempt-1)`, capped at `max_delay`
    Exponential {
        /// Multiplier applied per attempt (2.0 = double each time)
        multiplier: f64,
        /// Cap for the computed delay
        max_delay: Duration,
    },
}

/// Backoff policy: delay schedule plus an attempt cap.
///
/// Attempts are 1-based: `delay_for_attempt(1)` is the wait before the first
/// retry. `should_retry(n)` answers whether another attempt may be made after
/// `n` attempts have already failed.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    growth: Growth,
    max_attempts: u32,
}

impl BackoffPolicy {
    /// Linear backoff: `base × attempt`, up to `max_attempts` attempts.
    #[must_use]
    pub const fn linear(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            growth: Growth::Linear,
            max_attempts,
        }
    }

    /// Exponential backoff: `base × multiplier^(attempt-1)`, capped.
    #[must_use]
    pub const fn exponential(
        base: Duration,
        multiplier: f64,
        max_delay: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            base,
            growth: Growth::Exponential {
                multiplier,
                max_delay,
            },
            max_attempts,
        }
    }

    /// Delay before the given 1-based attempt number.
    ///
    /// Attempt 0 is treated as attempt 1.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.growth {
            Growth::Linear => self.base.saturating_mul(attempt),
            Growth::Exponential {
                multiplier,
                max_delay,
            } => {
                // Exponent bounded by max_attempts, so the cast cannot wrap.
                #[allow(clippy::cast_possible_wrap)]
                let delay_secs =
                    self.base.as_secs_f64() * multiplier.powi((attempt - 1) as i32);
                Duration::from_secs_f64(delay_secs.min(max_delay.as_secs_f64()))
            },
        }
    }

    /// Whether another attempt may be made after `attempts_so_far` failures.
    #[must_use]
    pub const fn should_retry(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.max_attempts
    }

    /// Maximum number of attempts.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_ladder_matches_reconnect_schedule() {
        let policy = BackoffPolicy::linear(Duration::from_secs(3), 5);

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(3));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(6));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(9));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(12));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(15));
    }

    #[test]
    fn attempt_zero_is_treated_as_one() {
        let policy = BackoffPolicy::linear(Duration::from_secs(3), 5);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(3));
    }

    #[test]
    fn retry_stops_at_max_attempts() {
        let policy = BackoffPolicy::linear(Duration::from_secs(3), 5);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
        assert!(!policy.should_retry(6));
    }

    #[test]
    fn exponential_growth_is_capped() {
        let policy = BackoffPolicy::exponential(
            Duration::from_millis(1000),
            10.0,
            Duration::from_secs(2),
            8,
        );

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        // 1000ms * 10^4 = 10,000,000ms, but capped at 2000ms
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
    }
}
