use deriv_bot_core::StopReason;
use rust_decimal::Decimal;
use thiserror::Error;

/// Hard limits that end a session. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskBreach {
    #[error("insufficient balance: stake {stake} exceeds balance {balance}")]
    InsufficientBalance { stake: Decimal, balance: Decimal },

    #[error("max drawdown reached: balance {balance} at or below floor {floor}")]
    MaxDrawdown { balance: Decimal, floor: Decimal },

    #[error("daily loss limit reached: lost {loss} of {limit} allowed")]
    DailyLossLimit { loss: Decimal, limit: Decimal },

    #[error("{count} consecutive losses (limit {limit})")]
    ConsecutiveLosses { count: u32, limit: u32 },

    #[error("next stake {stake} exceeds balance {balance}")]
    NextStakeUnaffordable { stake: Decimal, balance: Decimal },
}

impl RiskBreach {
    #[must_use]
    pub fn stop_reason(&self) -> StopReason {
        match self {
            Self::InsufficientBalance { .. } => StopReason::InsufficientBalance,
            Self::MaxDrawdown { .. } => StopReason::MaxDrawdown,
            Self::DailyLossLimit { .. } => StopReason::DailyLossLimit,
            Self::ConsecutiveLosses { .. } => StopReason::ConsecutiveLosses,
            Self::NextStakeUnaffordable { .. } => StopReason::NextStakeUnaffordable,
        }
    }
}

/// Operator commands the engine refuses in its current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("broker connection is not ready, try again later")]
    NotReady,

    #[error("auto trading is already running")]
    AlreadyRunning,

    #[error("auto trading is not running")]
    NotRunning,

    #[error("cannot reconfigure while a session is running")]
    SessionActive,
}
