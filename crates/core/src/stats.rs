use crate::trading::ContractType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Running totals for the current trading session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_profit: Decimal,
    pub starting_balance: Decimal,
    pub current_balance: Decimal,
    pub highest_balance: Decimal,
    pub lowest_balance: Decimal,
}

impl SessionStats {
    /// Fresh statistics anchored at the given starting balance.
    #[must_use]
    pub fn starting_at(balance: Decimal) -> Self {
        Self {
            starting_balance: balance,
            current_balance: balance,
            highest_balance: balance,
            lowest_balance: balance,
            ..Self::default()
        }
    }

    pub fn record_outcome(&mut self, profit: Decimal, is_win: bool) {
        self.total_trades += 1;
        if is_win {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.total_profit += profit;
    }

    pub fn update_balance(&mut self, balance: Decimal) {
        self.current_balance = balance;
        if balance > self.highest_balance {
            self.highest_balance = balance;
        }
        if balance < self.lowest_balance {
            self.lowest_balance = balance;
        }
    }

    /// Percentage of settled trades that won, 0 when nothing has settled.
    #[must_use]
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        f64::from(self.wins) / f64::from(self.total_trades) * 100.0
    }

    #[must_use]
    pub fn net_profit(&self) -> Decimal {
        self.current_balance - self.starting_balance
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    OperatorRequest,
    InsufficientBalance,
    MaxDrawdown,
    DailyLossLimit,
    ConsecutiveLosses,
    NextStakeUnaffordable,
    OrderRetriesExhausted,
    ConnectionLost,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TargetReached => "target trade count reached",
            Self::OperatorRequest => "stopped by operator",
            Self::InsufficientBalance => "balance below stake",
            Self::MaxDrawdown => "maximum drawdown breached",
            Self::DailyLossLimit => "daily loss limit reached",
            Self::ConsecutiveLosses => "consecutive loss limit reached",
            Self::NextStakeUnaffordable => "next stake exceeds balance",
            Self::OrderRetriesExhausted => "order retries exhausted",
            Self::ConnectionLost => "broker connection failed",
        };
        f.write_str(s)
    }
}

/// Immutable journal entry for one settled contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub trade_number: u32,
    pub contract_id: u64,
    pub contract_type: ContractType,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub stake: Decimal,
    pub payout: Decimal,
    pub profit: Decimal,
    pub is_win: bool,
    pub martingale_level: u32,
    pub timestamp: DateTime<Utc>,
}

/// End-of-session report handed to the operator and the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub net_profit: Decimal,
    pub starting_balance: Decimal,
    pub final_balance: Decimal,
    pub highest_balance: Decimal,
    pub lowest_balance: Decimal,
    pub max_drawdown: Decimal,
    pub recoveries_succeeded: u32,
    pub recoveries_failed: u32,
    pub stop_reason: Option<StopReason>,
}

impl SessionSummary {
    #[must_use]
    pub fn from_stats(stats: &SessionStats) -> Self {
        Self {
            total_trades: stats.total_trades,
            wins: stats.wins,
            losses: stats.losses,
            win_rate: stats.win_rate(),
            net_profit: stats.net_profit(),
            starting_balance: stats.starting_balance,
            final_balance: stats.current_balance,
            highest_balance: stats.highest_balance,
            lowest_balance: stats.lowest_balance,
            max_drawdown: Decimal::ZERO,
            recoveries_succeeded: 0,
            recoveries_failed: 0,
            stop_reason: None,
        }
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session summary")?;
        writeln!(
            f,
            "  Trades:    {} ({}W / {}L)",
            self.total_trades, self.wins, self.losses
        )?;
        writeln!(f, "  Win rate:  {:.1}%", self.win_rate)?;
        writeln!(f, "  Net P/L:   {:+.2}", self.net_profit)?;
        writeln!(
            f,
            "  Balance:   {:.2} -> {:.2} (high {:.2}, low {:.2})",
            self.starting_balance, self.final_balance, self.highest_balance, self.lowest_balance
        )?;
        writeln!(f, "  Max drawdown: {:.2}", self.max_drawdown)?;
        write!(
            f,
            "  Recoveries: {} ok / {} failed",
            self.recoveries_succeeded, self.recoveries_failed
        )?;
        if let Some(reason) = self.stop_reason {
            write!(f, "\n  Stopped:   {reason}")?;
        }
        Ok(())
    }
}
