use crate::account::ConnectionState;
use crate::trading::ContractType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single price update for a subscribed symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub quote: Decimal,
    pub epoch: Option<i64>,
}

/// Broker response to a buy request, correlated by request id.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderAck {
    Accepted {
        req_id: u64,
        contract_id: u64,
        buy_price: Decimal,
    },
    Rejected {
        req_id: u64,
        code: String,
        message: String,
    },
}

impl OrderAck {
    #[must_use]
    pub fn req_id(&self) -> u64 {
        match self {
            Self::Accepted { req_id, .. } | Self::Rejected { req_id, .. } => *req_id,
        }
    }
}

/// Streamed state of an open contract.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContractUpdate {
    pub contract_id: u64,
    pub is_sold: bool,
    pub status: Option<String>,
    pub profit: Decimal,
    pub payout: Option<Decimal>,
    pub sell_price: Option<Decimal>,
    pub entry_spot: Option<Decimal>,
    pub exit_spot: Option<Decimal>,
}

impl ContractUpdate {
    /// A contract is settled once sold or once its status reports a final result.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.is_sold
            || matches!(
                self.status.as_deref(),
                Some("sold") | Some("won") | Some("lost")
            )
    }

    #[must_use]
    pub fn is_win(&self) -> bool {
        match self.status.as_deref() {
            Some("won") => true,
            Some("lost") => false,
            _ => self.profit > Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceUpdate {
    pub balance: Decimal,
    pub currency: String,
}

/// One tradable contract offering returned by a contract catalogue query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableContract {
    pub contract_type: String,
    pub min_duration: Option<String>,
    pub max_duration: Option<String>,
}

/// Everything the broker client reports to its single consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Tick(Tick),
    OrderAck(OrderAck),
    Contract(ContractUpdate),
    Balance(BalanceUpdate),
    ContractsFor {
        symbol: String,
        contracts: Vec<AvailableContract>,
    },
    ConnectionStateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    BrokerError {
        code: String,
        message: String,
    },
}

/// Operator notification for an accepted order.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeOpened {
    pub contract_type: ContractType,
    pub entry_price: Decimal,
    pub stake: Decimal,
    pub trade_number: u32,
    pub target_trades: u32,
}

/// Operator notification for a settled contract.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeClosed {
    pub is_win: bool,
    pub profit: Decimal,
    pub balance: Decimal,
    pub trade_number: u32,
    pub target_trades: u32,
    pub next_stake: Decimal,
}
