//! Rolling session analytics: recent win rate, drawdown and martingale recoveries.

use deriv_bot_core::MartingaleConfig;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::fmt;

/// Which martingale multiplier the recent record allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplierTier {
    Conservative,
    Normal,
    Aggressive,
}

impl MultiplierTier {
    #[must_use]
    pub fn multiplier(self, config: &MartingaleConfig) -> Decimal {
        match self {
            Self::Conservative => config.conservative_multiplier,
            Self::Normal => config.base_multiplier,
            Self::Aggressive => config.aggressive_multiplier,
        }
    }
}

impl fmt::Display for MultiplierTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Conservative => "conservative",
            Self::Normal => "normal",
            Self::Aggressive => "aggressive",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionAnalytics {
    window: usize,
    outcomes: VecDeque<bool>,
    peak_balance: Decimal,
    current_balance: Decimal,
    max_drawdown: Decimal,
    pub recoveries_succeeded: u32,
    pub recoveries_failed: u32,
}

impl SessionAnalytics {
    #[must_use]
    pub fn new(window: usize, starting_balance: Decimal) -> Self {
        let window = window.max(1);
        Self {
            window,
            outcomes: VecDeque::with_capacity(window),
            peak_balance: starting_balance,
            current_balance: starting_balance,
            max_drawdown: Decimal::ZERO,
            recoveries_succeeded: 0,
            recoveries_failed: 0,
        }
    }

    pub fn record_outcome(&mut self, is_win: bool) {
        if self.outcomes.len() == self.window {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(is_win);
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.outcomes.len()
    }

    /// Fraction of wins in the window, in `[0, 1]`. Zero with no samples.
    #[must_use]
    pub fn rolling_win_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let wins = self.outcomes.iter().filter(|&&won| won).count();
        wins as f64 / self.outcomes.len() as f64
    }

    pub fn update_balance(&mut self, balance: Decimal) {
        self.current_balance = balance;
        if balance > self.peak_balance {
            self.peak_balance = balance;
        }
        let drawdown = self.current_drawdown();
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }
    }

    /// Peak-to-current decline.
    #[must_use]
    pub fn current_drawdown(&self) -> Decimal {
        (self.peak_balance - self.current_balance).max(Decimal::ZERO)
    }

    #[must_use]
    pub fn max_drawdown(&self) -> Decimal {
        self.max_drawdown
    }

    #[must_use]
    pub fn peak_balance(&self) -> Decimal {
        self.peak_balance
    }

    pub fn record_recovery(&mut self, succeeded: bool) {
        if succeeded {
            self.recoveries_succeeded += 1;
        } else {
            self.recoveries_failed += 1;
        }
    }

    #[must_use]
    pub fn tier(&self, config: &MartingaleConfig) -> MultiplierTier {
        if self.outcomes.len() < config.min_samples {
            return MultiplierTier::Normal;
        }
        let rate = self.rolling_win_rate();
        if rate >= config.high_win_rate {
            MultiplierTier::Aggressive
        } else if rate <= config.low_win_rate {
            MultiplierTier::Conservative
        } else {
            MultiplierTier::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn with_outcomes(outcomes: &[bool]) -> SessionAnalytics {
        let mut analytics = SessionAnalytics::new(10, dec!(100));
        for &won in outcomes {
            analytics.record_outcome(won);
        }
        analytics
    }

    #[test]
    fn test_window_keeps_last_n() {
        let mut analytics = SessionAnalytics::new(3, dec!(100));
        for won in [false, false, true, true, true] {
            analytics.record_outcome(won);
        }
        assert_eq!(analytics.sample_count(), 3);
        assert_eq!(analytics.rolling_win_rate(), 1.0);
    }

    #[test]
    fn test_tier_needs_min_samples() {
        let config = MartingaleConfig::default();
        let analytics = with_outcomes(&[true, true, true, true]);
        assert_eq!(analytics.tier(&config), MultiplierTier::Normal);
    }

    #[test]
    fn test_tier_selection() {
        let config = MartingaleConfig::default();

        let hot = with_outcomes(&[true, true, true, false, false]);
        assert_eq!(hot.tier(&config), MultiplierTier::Aggressive);
        assert_eq!(hot.tier(&config).multiplier(&config), dec!(2.5));

        let cold = with_outcomes(&[true, true, false, false, false]);
        assert_eq!(cold.tier(&config), MultiplierTier::Conservative);
        assert_eq!(cold.tier(&config).multiplier(&config), dec!(1.6));

        let mixed = with_outcomes(&[true, false, true, false, true, false]);
        assert_eq!(mixed.tier(&config), MultiplierTier::Normal);
        assert_eq!(mixed.tier(&config).multiplier(&config), dec!(2.1));
    }

    #[test]
    fn test_thresholds_come_from_config() {
        let config = MartingaleConfig {
            high_win_rate: 0.9,
            min_samples: 2,
            ..MartingaleConfig::default()
        };
        let analytics = with_outcomes(&[true, true, false]);
        assert_eq!(analytics.tier(&config), MultiplierTier::Normal);
    }

    #[test]
    fn test_drawdown_tracks_peak() {
        let mut analytics = SessionAnalytics::new(10, dec!(100));
        analytics.update_balance(dec!(95));
        analytics.update_balance(dec!(110));
        analytics.update_balance(dec!(102));
        assert_eq!(analytics.peak_balance(), dec!(110));
        assert_eq!(analytics.current_drawdown(), dec!(8));
        assert_eq!(analytics.max_drawdown(), dec!(8));

        analytics.update_balance(dec!(112));
        assert_eq!(analytics.current_drawdown(), Decimal::ZERO);
        assert_eq!(analytics.max_drawdown(), dec!(8));
    }
}
