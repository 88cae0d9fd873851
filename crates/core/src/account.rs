use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the broker connection.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Authorizing -> Ready
/// Ready --(health failure | transport close)--> Reconnecting -> Connecting
/// Reconnecting --(budget exhausted)--> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authorizing,
    Ready,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    /// States in which a transport session exists or is being established.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Authorizing | Self::Ready | Self::Reconnecting
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authorizing => "authorizing",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Which broker account a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Demo,
    Real,
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Demo => f.write_str("demo"),
            Self::Real => f.write_str("real"),
        }
    }
}

impl std::str::FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "demo" | "virtual" => Ok(Self::Demo),
            "real" | "live" => Ok(Self::Real),
            other => Err(format!("unknown account type: {other}")),
        }
    }
}

/// Account details returned by a successful authorization.
///
/// Replaced wholesale on every authorization; only `balance` changes
/// in place when balance updates stream in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: String,
    pub balance: Decimal,
    pub currency: String,
    pub is_virtual: bool,
    pub account_type: AccountType,
}
