//! Martingale staking with a win-rate adaptive multiplier.

use crate::analytics::{MultiplierTier, SessionAnalytics};
use crate::error::RiskBreach;
use crate::risk::{HardLimits, RiskCounters};
use deriv_bot_core::MartingaleConfig;
use rust_decimal::{Decimal, RoundingStrategy};

/// What the staking policy did with a settled trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeOutcome {
    /// Win outside a martingale sequence.
    Base,
    /// Win that closed a martingale sequence.
    Recovered,
    /// Loss: stake multiplied for the next trade.
    Escalated { level: u32, tier: MultiplierTier },
    /// Loss at the level ceiling: back to base stake.
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct MartingaleStaking {
    config: MartingaleConfig,
    base_stake: Decimal,
    current_stake: Decimal,
}

impl MartingaleStaking {
    #[must_use]
    pub fn new(config: MartingaleConfig, base_stake: Decimal) -> Self {
        Self {
            config,
            base_stake,
            current_stake: base_stake,
        }
    }

    #[must_use]
    pub fn base_stake(&self) -> Decimal {
        self.base_stake
    }

    #[must_use]
    pub fn current_stake(&self) -> Decimal {
        self.current_stake
    }

    #[must_use]
    pub fn config(&self) -> &MartingaleConfig {
        &self.config
    }

    pub fn reset(&mut self, base_stake: Decimal) {
        self.base_stake = base_stake;
        self.current_stake = base_stake;
    }

    pub fn on_win(
        &mut self,
        counters: &mut RiskCounters,
        analytics: &mut SessionAnalytics,
    ) -> StakeOutcome {
        self.current_stake = self.base_stake;
        if counters.record_win() {
            analytics.record_recovery(true);
            StakeOutcome::Recovered
        } else {
            StakeOutcome::Base
        }
    }

    /// Applies a losing trade and computes the next stake.
    ///
    /// # Errors
    ///
    /// `ConsecutiveLosses` when the streak hits its ceiling and
    /// `NextStakeUnaffordable` when the escalated stake exceeds `balance`.
    /// The current stake is left unchanged on error.
    pub fn on_loss(
        &mut self,
        loss: Decimal,
        balance: Decimal,
        limits: &HardLimits,
        counters: &mut RiskCounters,
        analytics: &mut SessionAnalytics,
    ) -> Result<StakeOutcome, RiskBreach> {
        counters.record_loss(loss);
        limits.check_streak(counters)?;

        counters.martingale_level += 1;
        counters.in_martingale_sequence = true;

        if counters.martingale_level >= self.config.max_level {
            counters.reset_sequence();
            analytics.record_recovery(false);
            self.current_stake = self.base_stake;
            return Ok(StakeOutcome::Abandoned);
        }

        let tier = analytics.tier(&self.config);
        let next = (self.current_stake * tier.multiplier(&self.config))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        if next > balance {
            return Err(RiskBreach::NextStakeUnaffordable {
                stake: next,
                balance,
            });
        }

        self.current_stake = next;
        Ok(StakeOutcome::Escalated {
            level: counters.martingale_level,
            tier,
        })
    }
}
