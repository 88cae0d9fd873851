use crate::events::{TradeClosed, TradeOpened};
use crate::stats::{SessionSummary, TradeResult};
use crate::trading::{Analysis, OrderRequest};
use anyhow::Result;
use rust_decimal::Decimal;

/// Indicator readings exposed for status reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalStats {
    pub tick_count: usize,
    pub current_price: Option<Decimal>,
    pub indicators: Vec<(&'static str, f64)>,
    pub trend: String,
}

/// Turns a tick stream into BUY / SELL / WAIT classifications.
pub trait SignalEngine: Send {
    fn add_tick(&mut self, price: Decimal);
    fn analyze(&mut self) -> Analysis;
    fn clear_history(&mut self);
    fn stats(&self) -> SignalStats;
}

/// Receives session lifecycle events for the human operator.
///
/// Implementations must not block; the execution engine calls these inline.
pub trait OperatorNotifier: Send + Sync {
    fn on_trade_opened(&self, trade: &TradeOpened);
    fn on_trade_closed(&self, trade: &TradeClosed);
    fn on_session_complete(&self, summary: &SessionSummary);
    fn on_error(&self, message: &str);
    fn on_progress(&self, message: &str);
}

/// Append-only record of settled trades and session summaries.
pub trait TradeJournal: Send {
    fn record_trade(&mut self, trade: &TradeResult) -> Result<()>;
    fn record_summary(&mut self, summary: &SessionSummary) -> Result<()>;
}

/// Order routing surface of the broker client as seen by the execution engine.
///
/// Every send reports failure instead of erroring; nothing is sent unless the
/// connection is authorized.
pub trait OrderGateway: Send + Sync {
    fn is_ready(&self) -> bool;
    fn balance(&self) -> Option<Decimal>;
    fn currency(&self) -> String;
    /// Sends a buy request, returning its request id for ack correlation.
    fn send_order(&self, order: &OrderRequest) -> Option<u64>;
    fn subscribe_ticks(&self, symbol: &str) -> bool;
    fn unsubscribe_ticks(&self) -> bool;
    fn subscribe_contract(&self, contract_id: u64) -> bool;
}

/// Journal that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullJournal;

impl TradeJournal for NullJournal {
    fn record_trade(&mut self, _trade: &TradeResult) -> Result<()> {
        Ok(())
    }

    fn record_summary(&mut self, _summary: &SessionSummary) -> Result<()> {
        Ok(())
    }
}
