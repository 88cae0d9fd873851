//! Session risk counters and the hard limits checked before every order.

use crate::error::RiskBreach;
use chrono::NaiveDate;
use deriv_bot_core::RiskConfig;
use rust_decimal::Decimal;

/// Loss tracking for the running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskCounters {
    pub consecutive_losses: u32,
    /// Sum of losses realised on `day`, as a positive amount.
    pub daily_loss: Decimal,
    pub martingale_level: u32,
    pub in_martingale_sequence: bool,
    pub day: NaiveDate,
}

impl RiskCounters {
    #[must_use]
    pub fn new(today: NaiveDate) -> Self {
        Self {
            consecutive_losses: 0,
            daily_loss: Decimal::ZERO,
            martingale_level: 0,
            in_martingale_sequence: false,
            day: today,
        }
    }

    /// Resets the daily loss when the calendar day changed. Returns true on rollover.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        if today == self.day {
            return false;
        }
        self.day = today;
        self.daily_loss = Decimal::ZERO;
        true
    }

    /// Records a win. Returns true if it closed an active martingale sequence.
    pub fn record_win(&mut self) -> bool {
        let recovered = self.in_martingale_sequence;
        self.consecutive_losses = 0;
        self.reset_sequence();
        recovered
    }

    pub fn record_loss(&mut self, amount: Decimal) {
        self.consecutive_losses += 1;
        self.daily_loss += amount.abs();
    }

    pub fn reset_sequence(&mut self) {
        self.martingale_level = 0;
        self.in_martingale_sequence = false;
    }
}

/// Pre-order validation. Checks run in a fixed order and the first failure wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardLimits {
    pub min_stake: Decimal,
    pub max_loss_fraction: Decimal,
    pub max_daily_loss: Decimal,
    pub max_consecutive_losses: u32,
}

impl From<&RiskConfig> for HardLimits {
    fn from(config: &RiskConfig) -> Self {
        Self {
            min_stake: config.min_stake,
            max_loss_fraction: config.max_loss_fraction,
            max_daily_loss: config.max_daily_loss,
            max_consecutive_losses: config.max_consecutive_losses,
        }
    }
}

impl HardLimits {
    /// Balance below which the session is over.
    #[must_use]
    pub fn drawdown_floor(&self, starting_balance: Decimal) -> Decimal {
        starting_balance * (Decimal::ONE - self.max_loss_fraction)
    }

    /// # Errors
    ///
    /// Returns the first limit the order would breach: balance, then
    /// drawdown from the session start, then the daily loss ceiling.
    pub fn check_order(
        &self,
        stake: Decimal,
        balance: Decimal,
        starting_balance: Decimal,
        daily_loss: Decimal,
    ) -> Result<(), RiskBreach> {
        if balance < stake {
            return Err(RiskBreach::InsufficientBalance { stake, balance });
        }

        let floor = self.drawdown_floor(starting_balance);
        if balance <= floor {
            return Err(RiskBreach::MaxDrawdown { balance, floor });
        }

        if daily_loss >= self.max_daily_loss {
            return Err(RiskBreach::DailyLossLimit {
                loss: daily_loss,
                limit: self.max_daily_loss,
            });
        }

        Ok(())
    }

    /// # Errors
    ///
    /// `ConsecutiveLosses` once the streak reaches the configured ceiling.
    pub fn check_streak(&self, counters: &RiskCounters) -> Result<(), RiskBreach> {
        if counters.consecutive_losses >= self.max_consecutive_losses {
            return Err(RiskBreach::ConsecutiveLosses {
                count: counters.consecutive_losses,
                limit: self.max_consecutive_losses,
            });
        }
        Ok(())
    }
}
