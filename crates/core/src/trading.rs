//! Trading vocabulary shared by the signal engine, the execution state
//! machine and the broker client.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary option direction. Serialized the way the broker expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractType {
    Call,
    Put,
}

impl ContractType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Call => "CALL",
            Self::Put => "PUT",
        }
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a signal engine evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Buy,
    Sell,
    Wait,
}

impl Classification {
    /// Contract placed for this classification; `Wait` places nothing.
    #[must_use]
    pub fn contract_type(self) -> Option<ContractType> {
        match self {
            Self::Buy => Some(ContractType::Call),
            Self::Sell => Some(ContractType::Put),
            Self::Wait => None,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("BUY"),
            Self::Sell => f.write_str("SELL"),
            Self::Wait => f.write_str("WAIT"),
        }
    }
}

/// A classification together with its confidence score and a short
/// human-readable rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub classification: Classification,
    /// Confluence score in `[0, 1]`.
    pub confidence: f64,
    pub rationale: String,
}

impl Analysis {
    pub fn wait(rationale: impl Into<String>) -> Self {
        Self {
            classification: Classification::Wait,
            confidence: 0.0,
            rationale: rationale.into(),
        }
    }
}

/// Lifecycle of a trading session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSessionState {
    #[default]
    Idle,
    Running,
    WaitingResult,
    Stopped,
}

impl fmt::Display for TradeSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::WaitingResult => "waiting_result",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Contract duration unit, using the broker's single-letter codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DurationUnit {
    #[default]
    #[serde(rename = "t")]
    Ticks,
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
}

impl DurationUnit {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Ticks => "t",
            Self::Seconds => "s",
            Self::Minutes => "m",
            Self::Hours => "h",
            Self::Days => "d",
        }
    }

    fn default_amount(self) -> u32 {
        match self {
            Self::Ticks => 5,
            Self::Seconds => 30,
            Self::Minutes | Self::Hours | Self::Days => 1,
        }
    }
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Parses operator duration input such as `"5t"`, `"1m"`, `"30s"` or `"7"`.
///
/// A bare number is read as ticks. A missing or unreadable amount falls back
/// to the unit's default (5 ticks, 30 seconds, 1 of anything larger), and
/// unrecognised input yields 5 ticks.
#[must_use]
pub fn parse_duration(input: &str) -> (u32, DurationUnit) {
    let input = input.trim().to_ascii_lowercase();

    if let Ok(amount) = input.parse::<u32>() {
        return (amount, DurationUnit::Ticks);
    }

    let unit = match input.chars().last() {
        Some('t') => DurationUnit::Ticks,
        Some('s') => DurationUnit::Seconds,
        Some('m') => DurationUnit::Minutes,
        Some('h') => DurationUnit::Hours,
        Some('d') => DurationUnit::Days,
        _ => return (DurationUnit::Ticks.default_amount(), DurationUnit::Ticks),
    };

    let amount = input[..input.len() - 1]
        .parse::<u32>()
        .unwrap_or_else(|_| unit.default_amount());
    (amount, unit)
}

/// Operator-supplied parameters for a trading session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeConfig {
    pub symbol: String,
    pub base_stake: Decimal,
    pub duration: u32,
    pub duration_unit: DurationUnit,
    /// Number of settled trades after which the session completes; 0 means unlimited.
    pub target_trades: u32,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            symbol: "frxXAUUSD".to_string(),
            base_stake: dec!(0.35),
            duration: 5,
            duration_unit: DurationUnit::Ticks,
            target_trades: 0,
        }
    }
}

impl TradeConfig {
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.target_trades == 0
    }
}

/// Parameters of a single buy request sent to the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub contract_type: ContractType,
    pub stake: Decimal,
    pub duration: u32,
    pub duration_unit: DurationUnit,
    pub currency: String,
}

/// The single contract a session is currently tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub contract_id: u64,
    pub contract_type: ContractType,
    pub entry_price: Decimal,
    pub stake: Decimal,
}
