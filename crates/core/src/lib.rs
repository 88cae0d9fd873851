pub mod account;
pub mod config;
pub mod config_loader;
pub mod events;
pub mod retry;
pub mod stats;
pub mod trading;
pub mod traits;

pub use account::{AccountSnapshot, AccountType, ConnectionState};
pub use config::{
    AppConfig, BrokerConfig, Credentials, JournalConfig, MartingaleConfig, RiskConfig,
    TradingConfig,
};
pub use config_loader::ConfigLoader;
pub use events::{
    AvailableContract, BalanceUpdate, ClientEvent, ContractUpdate, OrderAck, Tick, TradeClosed,
    TradeOpened,
};
pub use retry::RetryPolicy;
pub use stats::{SessionStats, SessionSummary, StopReason, TradeResult};
pub use trading::{
    parse_duration, Analysis, Classification, ContractType, DurationUnit, OpenOrder,
    OrderRequest, TradeConfig, TradeSessionState,
};
pub use traits::{
    NullJournal, OperatorNotifier, OrderGateway, SignalEngine, SignalStats, TradeJournal,
};
