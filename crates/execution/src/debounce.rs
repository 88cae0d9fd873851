//! Per-key notification debouncing.
//!
//! Retried conditions (order rejections, reconnect attempts, broker errors)
//! can fire many times a minute; the operator only needs to hear about each
//! kind once per interval.

use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::time::Duration;

type KeyedLimiter<C> =
    RateLimiter<String, DashMapStateStore<String>, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Lets one message per key through each interval.
pub struct Debouncer<C: Clock = DefaultClock> {
    /// `None` when the interval is zero: everything passes.
    limiter: Option<KeyedLimiter<C>>,
}

impl Debouncer {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(interval, &DefaultClock::default())
    }
}

impl<C: Clock> Debouncer<C> {
    pub fn with_clock(interval: Duration, clock: &C) -> Self {
        let limiter = Quota::with_period(interval)
            .map(|quota| RateLimiter::dashmap_with_clock(quota, clock));
        Self { limiter }
    }

    /// Returns true if a message for `key` should be emitted now.
    pub fn should_emit(&self, key: &str) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check_key(&key.to_string()).is_ok(),
            None => true,
        }
    }
}
