use crate::account::AccountType;
use crate::retry::RetryPolicy;
use crate::trading::{parse_duration, TradeConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "wss://ws.derivws.com/websockets/v3";
pub const DEFAULT_APP_ID: u32 = 1089;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub trading: TradingConfig,
    pub risk: RiskConfig,
    pub martingale: MartingaleConfig,
    pub journal: JournalConfig,
}

/// Connection, credential and resilience settings for the broker client.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub endpoint: String,
    pub app_id: u32,
    pub demo_token: Option<String>,
    pub real_token: Option<String>,
    pub initial_account: AccountType,
    pub auth_timeout_secs: u64,
    pub max_auth_retries: u32,
    pub auth_retry_base_secs: u64,
    pub auth_retry_max_secs: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_secs: u64,
    pub reconnect_max_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_jitter_secs: u64,
    pub max_missed_pongs: u32,
    pub grace_period_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            app_id: DEFAULT_APP_ID,
            demo_token: None,
            real_token: None,
            initial_account: AccountType::Demo,
            auth_timeout_secs: 30,
            max_auth_retries: 3,
            auth_retry_base_secs: 2,
            auth_retry_max_secs: 30,
            max_reconnect_attempts: 5,
            reconnect_base_secs: 5,
            reconnect_max_secs: 60,
            heartbeat_interval_secs: 60,
            heartbeat_jitter_secs: 10,
            max_missed_pongs: 3,
            grace_period_secs: 10,
            probe_timeout_secs: 5,
        }
    }
}

impl BrokerConfig {
    /// Full WebSocket URL including the application id.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}?app_id={}", self.endpoint, self.app_id)
    }

    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.demo_token.clone(), self.real_token.clone())
    }

    #[must_use]
    pub fn auth_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.auth_retry_base_secs),
            Duration::from_secs(self.auth_retry_max_secs),
            self.max_auth_retries,
        )
    }

    #[must_use]
    pub fn reconnect_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.reconnect_base_secs),
            Duration::from_secs(self.reconnect_max_secs),
            self.max_reconnect_attempts,
        )
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("endpoint", &self.endpoint)
            .field("app_id", &self.app_id)
            .field("demo_token", &self.demo_token.as_deref().map(token_preview))
            .field("real_token", &self.real_token.as_deref().map(token_preview))
            .field("initial_account", &self.initial_account)
            .field("max_auth_retries", &self.max_auth_retries)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .finish_non_exhaustive()
    }
}

/// Shortened form of a token that is safe to log: first and last four characters.
#[must_use]
pub fn token_preview(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Per-account API tokens. Empty strings count as missing.
#[derive(Default)]
pub struct Credentials {
    demo: Option<SecretString>,
    real: Option<SecretString>,
}

impl Credentials {
    #[must_use]
    pub fn new(demo: Option<String>, real: Option<String>) -> Self {
        let secret = |token: Option<String>| {
            token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .map(SecretString::from)
        };
        Self {
            demo: secret(demo),
            real: secret(real),
        }
    }

    #[must_use]
    pub fn get(&self, account: AccountType) -> Option<&SecretString> {
        match account {
            AccountType::Demo => self.demo.as_ref(),
            AccountType::Real => self.real.as_ref(),
        }
    }

    #[must_use]
    pub fn has(&self, account: AccountType) -> bool {
        self.get(account).is_some()
    }

    #[must_use]
    pub fn preview(&self, account: AccountType) -> Option<String> {
        self.get(account).map(|s| token_preview(s.expose_secret()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("demo", &self.preview(AccountType::Demo))
            .field("real", &self.preview(AccountType::Real))
            .finish()
    }
}

/// Default session parameters; `duration` accepts the `5t` / `1m` / `30s` forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub symbol: String,
    pub stake: Decimal,
    pub duration: String,
    pub target_trades: u32,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: "frxXAUUSD".to_string(),
            stake: dec!(0.35),
            duration: "5t".to_string(),
            target_trades: 0,
        }
    }
}

impl TradingConfig {
    #[must_use]
    pub fn trade_config(&self) -> TradeConfig {
        let (duration, duration_unit) = parse_duration(&self.duration);
        TradeConfig {
            symbol: self.symbol.clone(),
            base_stake: self.stake,
            duration,
            duration_unit,
            target_trades: self.target_trades,
        }
    }
}

/// Hard limits enforced by the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub min_stake: Decimal,
    /// Session stops once balance falls to `start * (1 - max_loss_fraction)`.
    pub max_loss_fraction: Decimal,
    pub max_daily_loss: Decimal,
    pub max_consecutive_losses: u32,
    pub processing_timeout_secs: u64,
    pub cooldown_secs: u64,
    pub max_order_retries: u32,
    pub order_retry_base_ms: u64,
    pub order_retry_max_ms: u64,
    pub order_retry_jitter: f64,
    pub notify_debounce_secs: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_stake: dec!(0.35),
            max_loss_fraction: dec!(0.5),
            max_daily_loss: dec!(50),
            max_consecutive_losses: 8,
            processing_timeout_secs: 90,
            cooldown_secs: 3,
            max_order_retries: 3,
            order_retry_base_ms: 1_000,
            order_retry_max_ms: 8_000,
            order_retry_jitter: 0.25,
            notify_debounce_secs: 10,
        }
    }
}

impl RiskConfig {
    #[must_use]
    pub fn order_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.order_retry_base_ms),
            Duration::from_millis(self.order_retry_max_ms),
            self.max_order_retries,
        )
        .with_jitter(self.order_retry_jitter)
    }
}

/// Martingale staking and the analytics thresholds that pick its multiplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MartingaleConfig {
    pub base_multiplier: Decimal,
    pub aggressive_multiplier: Decimal,
    pub conservative_multiplier: Decimal,
    /// Rolling win rate at or above which the aggressive multiplier applies.
    pub high_win_rate: f64,
    /// Rolling win rate at or below which the conservative multiplier applies.
    pub low_win_rate: f64,
    pub window: usize,
    pub min_samples: usize,
    pub max_level: u32,
}

impl Default for MartingaleConfig {
    fn default() -> Self {
        Self {
            base_multiplier: dec!(2.1),
            aggressive_multiplier: dec!(2.5),
            conservative_multiplier: dec!(1.6),
            high_win_rate: 0.60,
            low_win_rate: 0.40,
            window: 10,
            min_samples: 5,
            max_level: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub enabled: bool,
    pub directory: PathBuf,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("journal"),
        }
    }
}
