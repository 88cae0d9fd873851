use rand::Rng;
use std::time::Duration;

/// Capped exponential backoff.
///
/// `delay_for(n)` is `min(base * 2^(n-1), max_delay)` for attempt `n >= 1`,
/// so delays never decrease and never exceed `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Upper bound of the random extra delay, as a fraction of the computed delay.
    pub jitter_fraction: f64,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            jitter_fraction: 0.0,
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Authorization retries: 2s doubling to 30s, three attempts.
    #[must_use]
    pub const fn auth() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(30), 3)
    }

    /// Transport reconnection: 5s doubling to 60s, five attempts.
    #[must_use]
    pub const fn reconnect() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(60), 5)
    }

    /// Rejected buy requests: 1s doubling to 8s with jitter, three attempts.
    #[must_use]
    pub fn order() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(8), 3).with_jitter(0.25)
    }

    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// `delay_for(attempt)` plus up to `jitter_fraction` of random extra, still capped.
    #[must_use]
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter_fraction <= 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.0..=self.jitter_fraction);
        (delay + delay.mul_f64(factor)).min(self.max_delay)
    }

    /// Whether `attempts` already made have used up the budget.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::reconnect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_until_cap() {
        let policy = RetryPolicy::reconnect();
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for(4), Duration::from_secs(40));
        assert_eq!(policy.delay_for(5), Duration::from_secs(60));
        assert_eq!(policy.delay_for(12), Duration::from_secs(60));
    }

    #[test]
    fn test_delays_monotonic_and_bounded() {
        let policies = [
            RetryPolicy::auth(),
            RetryPolicy::reconnect(),
            RetryPolicy::order(),
            RetryPolicy::new(Duration::from_millis(7), Duration::from_millis(1000), 50),
        ];
        for policy in policies {
            let mut previous = Duration::ZERO;
            for attempt in 1..=64 {
                let delay = policy.delay_for(attempt);
                assert!(delay >= previous, "attempt {attempt} went backwards");
                assert!(delay <= policy.max_delay);
                previous = delay;
            }
        }
    }

    #[test]
    fn test_jitter_stays_within_cap() {
        let policy = RetryPolicy::order();
        for attempt in 1..=10 {
            let base = policy.delay_for(attempt);
            let jittered = policy.jittered_delay_for(attempt);
            assert!(jittered >= base);
            assert!(jittered <= policy.max_delay);
        }
    }

    #[test]
    fn test_attempt_zero_uses_base_delay() {
        assert_eq!(RetryPolicy::auth().delay_for(0), Duration::from_secs(2));
    }

    #[test]
    fn test_exhaustion() {
        let policy = RetryPolicy::auth();
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }
}
