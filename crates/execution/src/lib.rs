//! Execution and risk state machine for Deriv binary-option sessions.
//!
//! [`TradingEngine`] turns signal classifications into at most one order in
//! flight, tracks it to settlement and applies martingale staking under hard
//! risk limits. [`SessionRunner`] owns an engine and feeds it from the broker
//! client's event queue.

pub mod analytics;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod risk;
pub mod runner;
pub mod staking;

pub use analytics::{MultiplierTier, SessionAnalytics};
pub use debounce::Debouncer;
pub use engine::TradingEngine;
pub use error::{ExecutionError, RiskBreach};
pub use risk::{HardLimits, RiskCounters};
pub use runner::{SessionCommand, SessionHandle, SessionRunner};
pub use staking::{MartingaleStaking, StakeOutcome};
