//! Application-level ping/pong health tracking.
//!
//! The heartbeat loop calls [`HealthState::on_heartbeat`] on every beat and
//! acts on the returned [`HeartbeatAction`]; the reader task calls
//! [`HealthState::on_pong`] whenever a pong arrives.

use deriv_bot_core::BrokerConfig;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthConfig {
    pub interval: Duration,
    /// Upper bound of the random delay added to every interval.
    pub jitter: Duration,
    pub max_missed_pongs: u32,
    pub grace_period: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            jitter: Duration::from_secs(10),
            max_missed_pongs: 3,
            grace_period: Duration::from_secs(10),
        }
    }
}

impl HealthConfig {
    #[must_use]
    pub fn from_broker(config: &BrokerConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.heartbeat_interval_secs),
            jitter: Duration::from_secs(config.heartbeat_jitter_secs),
            max_missed_pongs: config.max_missed_pongs,
            grace_period: Duration::from_secs(config.grace_period_secs),
        }
    }

    /// Interval plus a uniformly random jitter in `[0, jitter]`.
    #[must_use]
    pub fn next_wait(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.interval;
        }
        let extra = rand::thread_rng().gen_range(Duration::ZERO..=self.jitter);
        self.interval + extra
    }
}

/// What the heartbeat loop should do on this beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping and wait a normal jittered interval.
    Ping,
    /// Miss threshold reached: send a last ping and check again after the grace period.
    GracePing,
    /// Grace period elapsed without a pong: close the transport.
    ForceClose,
}

#[derive(Debug, Clone, Default)]
pub struct HealthState {
    pub last_pong: Option<Instant>,
    pub missed_pongs: u32,
    pub grace_period_start: Option<Instant>,
    pub awaiting_pong: bool,
}

impl HealthState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn on_heartbeat(&mut self, now: Instant, config: &HealthConfig) -> HeartbeatAction {
        if self.awaiting_pong {
            self.missed_pongs += 1;
        }

        if let Some(started) = self.grace_period_start {
            if now.duration_since(started) >= config.grace_period {
                return HeartbeatAction::ForceClose;
            }
            self.awaiting_pong = true;
            return HeartbeatAction::GracePing;
        }

        self.awaiting_pong = true;
        if self.missed_pongs >= config.max_missed_pongs {
            self.grace_period_start = Some(now);
            return HeartbeatAction::GracePing;
        }
        HeartbeatAction::Ping
    }

    /// Records a pong. Returns true if it cancelled a running grace period.
    pub fn on_pong(&mut self, now: Instant) -> bool {
        let was_in_grace = self.grace_period_start.is_some();
        self.last_pong = Some(now);
        self.missed_pongs = 0;
        self.grace_period_start = None;
        self.awaiting_pong = false;
        was_in_grace
    }

    #[must_use]
    pub fn in_grace_period(&self) -> bool {
        self.grace_period_start.is_some()
    }
}
