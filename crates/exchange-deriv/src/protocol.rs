//! Deriv WebSocket API message formats.
//!
//! Every request carries a `req_id` that the broker echoes back; every
//! response names its kind in `msg_type` and keeps the payload under a key
//! of the same name.
//!
//! ## Authorize
//! ```json
//! {"authorize": "<token>", "req_id": 1}
//! {"msg_type": "authorize", "req_id": 1,
//!  "authorize": {"loginid": "VRTC123", "balance": 10000, "currency": "USD", "is_virtual": 1}}
//! ```
//!
//! ## Buy
//! ```json
//! {"buy": 1, "subscribe": 1, "price": 0.5, "req_id": 7,
//!  "parameters": {"amount": 0.5, "basis": "stake", "contract_type": "CALL",
//!                 "currency": "USD", "duration": 5, "duration_unit": "t", "symbol": "R_100"}}
//! ```
//!
//! ## Error
//! ```json
//! {"msg_type": "authorize", "req_id": 1, "error": {"code": "InvalidToken", "message": "..."}}
//! ```

use crate::error::{ApiError, DerivError};
use deriv_bot_core::{
    AvailableContract, BalanceUpdate, ContractType, ContractUpdate, DurationUnit, OrderRequest,
    Tick,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Requests
// ============================================================================

/// Authorization request. Deliberately not `Debug`: it holds the raw token.
#[derive(Serialize)]
pub struct AuthorizeRequest<'a> {
    pub authorize: &'a str,
    pub req_id: u64,
}

#[derive(Debug, Serialize)]
pub struct PingRequest {
    pub ping: u8,
}

impl Default for PingRequest {
    fn default() -> Self {
        Self { ping: 1 }
    }
}

#[derive(Debug, Serialize)]
pub struct TicksRequest<'a> {
    pub ticks: &'a str,
    pub subscribe: u8,
    pub req_id: u64,
}

#[derive(Debug, Serialize)]
pub struct ForgetAllRequest<'a> {
    pub forget_all: &'a str,
    pub req_id: u64,
}

#[derive(Debug, Serialize)]
pub struct BalanceRequest {
    pub balance: u8,
    pub subscribe: u8,
    pub req_id: u64,
}

#[derive(Debug, Serialize)]
pub struct OpenContractRequest {
    pub proposal_open_contract: u8,
    pub contract_id: u64,
    pub subscribe: u8,
    pub req_id: u64,
}

#[derive(Debug, Serialize)]
pub struct ContractsForRequest<'a> {
    pub contracts_for: &'a str,
    pub currency: &'a str,
    pub product_type: &'static str,
    pub req_id: u64,
}

#[derive(Debug, Serialize)]
pub struct BuyRequest<'a> {
    pub buy: u8,
    pub subscribe: u8,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub parameters: BuyParameters<'a>,
    pub req_id: u64,
}

#[derive(Debug, Serialize)]
pub struct BuyParameters<'a> {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub basis: &'static str,
    pub contract_type: ContractType,
    pub currency: &'a str,
    pub duration: u32,
    pub duration_unit: DurationUnit,
    pub symbol: &'a str,
}

impl<'a> BuyRequest<'a> {
    /// Stake-based buy that also subscribes to the resulting contract.
    pub fn from_order(order: &'a OrderRequest, req_id: u64) -> Self {
        Self {
            buy: 1,
            subscribe: 1,
            price: order.stake,
            parameters: BuyParameters {
                amount: order.stake,
                basis: "stake",
                contract_type: order.contract_type,
                currency: &order.currency,
                duration: order.duration,
                duration_unit: order.duration_unit,
                symbol: &order.symbol,
            },
            req_id,
        }
    }
}

/// Serializes a request to the JSON text sent over the socket.
pub fn encode<T: Serialize>(request: &T) -> Result<String, DerivError> {
    Ok(serde_json::to_string(request)?)
}

// ============================================================================
// Responses
// ============================================================================

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Authorized {
        req_id: Option<u64>,
        account: AuthorizeBody,
    },
    Balance(BalanceUpdate),
    Tick {
        tick: Tick,
        subscription_id: Option<String>,
    },
    Bought {
        req_id: u64,
        contract_id: u64,
        buy_price: Decimal,
    },
    Contract {
        update: ContractUpdate,
        subscription_id: Option<String>,
    },
    Pong,
    ContractsFor {
        symbol: String,
        contracts: Vec<AvailableContract>,
    },
    Error {
        msg_type: Option<String>,
        req_id: Option<u64>,
        error: ApiError,
    },
    /// Acknowledgements and message kinds the client has no use for.
    Other(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    msg_type: Option<String>,
    #[serde(default)]
    req_id: Option<u64>,
    #[serde(default)]
    error: Option<ApiError>,
    #[serde(default)]
    subscription: Option<SubscriptionRef>,
    #[serde(default)]
    echo_req: Option<Value>,
    #[serde(flatten)]
    data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionRef {
    id: String,
}

/// Account details from a successful authorization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthorizeBody {
    pub loginid: String,
    pub balance: Decimal,
    #[serde(default)]
    pub currency: String,
    #[serde(default, deserialize_with = "flag")]
    pub is_virtual: bool,
}

#[derive(Debug, Deserialize)]
struct TickBody {
    symbol: String,
    quote: Decimal,
    #[serde(default)]
    epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct BuyBody {
    contract_id: u64,
    buy_price: Decimal,
}

#[derive(Debug, Deserialize)]
struct BalanceBody {
    balance: Decimal,
    #[serde(default)]
    currency: String,
}

#[derive(Debug, Deserialize)]
struct OpenContractBody {
    #[serde(default)]
    contract_id: Option<u64>,
    #[serde(default, deserialize_with = "flag")]
    is_sold: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    profit: Option<Decimal>,
    #[serde(default)]
    payout: Option<Decimal>,
    #[serde(default)]
    sell_price: Option<Decimal>,
    #[serde(default)]
    entry_spot: Option<Decimal>,
    #[serde(default)]
    exit_tick: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct ContractsForBody {
    #[serde(default)]
    available: Vec<AvailableBody>,
}

#[derive(Debug, Deserialize)]
struct AvailableBody {
    contract_type: String,
    #[serde(default)]
    min_contract_duration: Option<String>,
    #[serde(default)]
    max_contract_duration: Option<String>,
}

/// Accepts `true`/`false`, `0`/`1` or null.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        Some(Value::String(s)) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

/// Decodes one text frame.
///
/// # Errors
///
/// Returns `DerivError::Parse` for malformed JSON or a payload that does not
/// match its `msg_type`.
pub fn parse_inbound(text: &str) -> Result<Inbound, DerivError> {
    let mut envelope: Envelope = serde_json::from_str(text)?;
    let msg_type = envelope.msg_type.clone().unwrap_or_default();

    if let Some(error) = envelope.error.take() {
        return Ok(Inbound::Error {
            msg_type: envelope.msg_type,
            req_id: envelope.req_id,
            error,
        });
    }

    let body = envelope.data.remove(&msg_type).unwrap_or(Value::Null);
    let subscription_id = envelope.subscription.map(|s| s.id);

    let inbound = match msg_type.as_str() {
        "authorize" => {
            let mut auth: AuthorizeBody = serde_json::from_value(body)?;
            if auth.currency.is_empty() {
                auth.currency = "USD".to_string();
            }
            Inbound::Authorized {
                req_id: envelope.req_id,
                account: auth,
            }
        }
        "balance" => {
            let balance: BalanceBody = serde_json::from_value(body)?;
            Inbound::Balance(BalanceUpdate {
                balance: balance.balance,
                currency: balance.currency,
            })
        }
        "tick" => {
            let tick: TickBody = serde_json::from_value(body)?;
            Inbound::Tick {
                tick: Tick {
                    symbol: tick.symbol,
                    quote: tick.quote,
                    epoch: tick.epoch,
                },
                subscription_id,
            }
        }
        "buy" => {
            let buy: BuyBody = serde_json::from_value(body)?;
            Inbound::Bought {
                req_id: envelope.req_id.unwrap_or_default(),
                contract_id: buy.contract_id,
                buy_price: buy.buy_price,
            }
        }
        "proposal_open_contract" => {
            let contract: OpenContractBody = serde_json::from_value(body)?;
            match contract.contract_id {
                Some(contract_id) => Inbound::Contract {
                    update: ContractUpdate {
                        contract_id,
                        is_sold: contract.is_sold,
                        status: contract.status,
                        profit: contract.profit.unwrap_or_default(),
                        payout: contract.payout,
                        sell_price: contract.sell_price,
                        entry_spot: contract.entry_spot,
                        exit_spot: contract.exit_tick,
                    },
                    subscription_id,
                },
                // Empty body acknowledges a subscription for an unknown contract.
                None => Inbound::Other(msg_type),
            }
        }
        "ping" => match body.as_str() {
            Some("pong") => Inbound::Pong,
            _ => Inbound::Other(msg_type),
        },
        "contracts_for" => {
            let catalogue: ContractsForBody = serde_json::from_value(body)?;
            let symbol = envelope
                .echo_req
                .as_ref()
                .and_then(|echo| echo.get("contracts_for"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Inbound::ContractsFor {
                symbol,
                contracts: catalogue
                    .available
                    .into_iter()
                    .map(|c| AvailableContract {
                        contract_type: c.contract_type,
                        min_duration: c.min_contract_duration,
                        max_duration: c.max_contract_duration,
                    })
                    .collect(),
            }
        }
        _ => Inbound::Other(msg_type),
    };

    Ok(inbound)
}
