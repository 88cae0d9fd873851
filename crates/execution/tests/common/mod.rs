#![allow(dead_code)]

use anyhow::{bail, Result};
use deriv_bot_core::{
    Analysis, Classification, ContractType, ContractUpdate, MartingaleConfig, OperatorNotifier,
    OrderAck, OrderGateway, OrderRequest, RiskConfig, SessionSummary, SignalEngine, SignalStats,
    TradeClosed, TradeConfig, TradeJournal, TradeOpened, TradeResult,
};
use deriv_bot_execution::TradingEngine;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct GatewayState {
    pub ready: bool,
    pub balance: Decimal,
    pub fail_sends: bool,
    pub next_req_id: u64,
    pub sent: Vec<OrderRequest>,
    pub tick_subscriptions: Vec<String>,
    pub unsubscribes: u32,
    pub contract_subscriptions: Vec<u64>,
}

#[derive(Debug, Default)]
pub struct MockGateway {
    pub state: Mutex<GatewayState>,
}

impl MockGateway {
    pub fn ready(balance: Decimal) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GatewayState {
                ready: true,
                balance,
                ..GatewayState::default()
            }),
        })
    }

    pub fn sent_stakes(&self) -> Vec<Decimal> {
        self.state.lock().sent.iter().map(|o| o.stake).collect()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    pub fn last_req_id(&self) -> u64 {
        self.state.lock().next_req_id
    }

    pub fn set_balance(&self, balance: Decimal) {
        self.state.lock().balance = balance;
    }

    pub fn adjust_balance(&self, delta: Decimal) {
        self.state.lock().balance += delta;
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().ready = ready;
    }
}

impl OrderGateway for MockGateway {
    fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    fn balance(&self) -> Option<Decimal> {
        Some(self.state.lock().balance)
    }

    fn currency(&self) -> String {
        "USD".to_string()
    }

    fn send_order(&self, order: &OrderRequest) -> Option<u64> {
        let mut state = self.state.lock();
        if !state.ready || state.fail_sends {
            return None;
        }
        state.next_req_id += 1;
        state.sent.push(order.clone());
        Some(state.next_req_id)
    }

    fn subscribe_ticks(&self, symbol: &str) -> bool {
        let mut state = self.state.lock();
        state.tick_subscriptions.push(symbol.to_string());
        state.ready
    }

    fn unsubscribe_ticks(&self) -> bool {
        let mut state = self.state.lock();
        state.unsubscribes += 1;
        state.ready
    }

    fn subscribe_contract(&self, contract_id: u64) -> bool {
        let mut state = self.state.lock();
        state.contract_subscriptions.push(contract_id);
        state.ready
    }
}

#[derive(Debug)]
pub struct SignalScript {
    pub classification: Classification,
    pub ticks: usize,
    pub clears: usize,
}

/// Signal engine whose classification is set by the test.
#[derive(Clone)]
pub struct ScriptedSignals {
    pub script: Arc<Mutex<SignalScript>>,
}

impl ScriptedSignals {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(SignalScript {
                classification: Classification::Wait,
                ticks: 0,
                clears: 0,
            })),
        }
    }

    pub fn set(&self, classification: Classification) {
        self.script.lock().classification = classification;
    }
}

impl SignalEngine for ScriptedSignals {
    fn add_tick(&mut self, _price: Decimal) {
        self.script.lock().ticks += 1;
    }

    fn analyze(&mut self) -> Analysis {
        let classification = self.script.lock().classification;
        Analysis {
            classification,
            confidence: 0.8,
            rationale: "scripted".to_string(),
        }
    }

    fn clear_history(&mut self) {
        let mut script = self.script.lock();
        script.ticks = 0;
        script.clears += 1;
    }

    fn stats(&self) -> SignalStats {
        SignalStats {
            tick_count: self.script.lock().ticks,
            current_price: None,
            indicators: vec![("rsi", 25.0)],
            trend: "UP".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Note {
    Opened(TradeOpened),
    Closed(TradeClosed),
    Complete(SessionSummary),
    Error(String),
    Progress(String),
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub notes: Mutex<Vec<Note>>,
}

impl RecordingNotifier {
    pub fn notes(&self) -> Vec<Note> {
        self.notes.lock().clone()
    }

    pub fn completions(&self) -> Vec<SessionSummary> {
        self.notes()
            .into_iter()
            .filter_map(|n| match n {
                Note::Complete(summary) => Some(summary),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.notes()
            .into_iter()
            .filter_map(|n| match n {
                Note::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<String> {
        self.notes()
            .into_iter()
            .filter_map(|n| match n {
                Note::Progress(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn closed(&self) -> Vec<TradeClosed> {
        self.notes()
            .into_iter()
            .filter_map(|n| match n {
                Note::Closed(trade) => Some(trade),
                _ => None,
            })
            .collect()
    }
}

impl OperatorNotifier for RecordingNotifier {
    fn on_trade_opened(&self, trade: &TradeOpened) {
        self.notes.lock().push(Note::Opened(trade.clone()));
    }

    fn on_trade_closed(&self, trade: &TradeClosed) {
        self.notes.lock().push(Note::Closed(trade.clone()));
    }

    fn on_session_complete(&self, summary: &SessionSummary) {
        self.notes.lock().push(Note::Complete(summary.clone()));
    }

    fn on_error(&self, message: &str) {
        self.notes.lock().push(Note::Error(message.to_string()));
    }

    fn on_progress(&self, message: &str) {
        self.notes.lock().push(Note::Progress(message.to_string()));
    }
}

#[derive(Debug, Default)]
pub struct JournalLog {
    pub trades: Vec<TradeResult>,
    pub summaries: Vec<SessionSummary>,
    pub failing: bool,
}

#[derive(Clone, Default)]
pub struct MemoryJournal {
    pub log: Arc<Mutex<JournalLog>>,
}

impl TradeJournal for MemoryJournal {
    fn record_trade(&mut self, trade: &TradeResult) -> Result<()> {
        let mut log = self.log.lock();
        if log.failing {
            bail!("disk full");
        }
        log.trades.push(trade.clone());
        Ok(())
    }

    fn record_summary(&mut self, summary: &SessionSummary) -> Result<()> {
        let mut log = self.log.lock();
        if log.failing {
            bail!("disk full");
        }
        log.summaries.push(summary.clone());
        Ok(())
    }
}

pub const PRICE: Decimal = dec!(2650.25);

/// Engine wired to mocks, with a manually advanced clock.
pub struct Harness {
    pub engine: TradingEngine,
    pub gateway: Arc<MockGateway>,
    pub signals: ScriptedSignals,
    pub notifier: Arc<RecordingNotifier>,
    pub journal: MemoryJournal,
    pub risk: RiskConfig,
    pub now: Instant,
    next_contract_id: u64,
}

impl Harness {
    pub fn new(balance: Decimal) -> Self {
        Self::with_config(balance, RiskConfig::default(), MartingaleConfig::default())
    }

    pub fn with_config(balance: Decimal, risk: RiskConfig, martingale: MartingaleConfig) -> Self {
        let gateway = MockGateway::ready(balance);
        let signals = ScriptedSignals::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let journal = MemoryJournal::default();
        let engine = TradingEngine::new(
            gateway.clone(),
            Box::new(signals.clone()),
            notifier.clone(),
            &risk,
            martingale,
        )
        .with_journal(Box::new(journal.clone()));
        Self {
            engine,
            gateway,
            signals,
            notifier,
            journal,
            risk,
            now: Instant::now(),
            next_contract_id: 1000,
        }
    }

    pub fn trade_config(stake: Decimal, target_trades: u32) -> TradeConfig {
        TradeConfig {
            base_stake: stake,
            target_trades,
            ..TradeConfig::default()
        }
    }

    pub fn start(&mut self, stake: Decimal, target_trades: u32) {
        self.engine
            .configure(Self::trade_config(stake, target_trades))
            .unwrap();
        self.engine.start().unwrap();
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    pub fn tick(&mut self) {
        self.engine.on_tick(PRICE, self.now);
    }

    pub fn accept(&mut self) -> u64 {
        self.next_contract_id += 1;
        let contract_id = self.next_contract_id;
        let stake = self
            .gateway
            .state
            .lock()
            .sent
            .last()
            .map(|o| o.stake)
            .unwrap_or_default();
        self.gateway.adjust_balance(-stake);
        self.engine.on_order_ack(
            OrderAck::Accepted {
                req_id: self.gateway.last_req_id(),
                contract_id,
                buy_price: stake,
            },
            self.now,
        );
        contract_id
    }

    pub fn reject(&mut self, code: &str) {
        self.engine.on_order_ack(
            OrderAck::Rejected {
                req_id: self.gateway.last_req_id(),
                code: code.to_string(),
                message: "rejected by broker".to_string(),
            },
            self.now,
        );
    }

    /// Settles `contract_id`. A win pays 95% on top of the stake.
    pub fn settle(&mut self, contract_id: u64, stake: Decimal, win: bool) {
        let (profit, payout, status) = if win {
            let profit = (stake * dec!(0.95)).round_dp(2);
            (profit, stake + profit, "won")
        } else {
            (-stake, Decimal::ZERO, "lost")
        };
        self.gateway.adjust_balance(payout);
        self.engine.on_contract_update(
            ContractUpdate {
                contract_id,
                is_sold: true,
                status: Some(status.to_string()),
                profit,
                payout: Some(payout),
                sell_price: Some(payout),
                entry_spot: Some(PRICE),
                exit_spot: Some(PRICE + dec!(0.5)),
            },
            self.now,
        );
    }

    /// Signal, order, accept and settle one trade, then wait out the cooldown.
    pub fn trade(&mut self, contract_type: ContractType, win: bool) {
        self.signals.set(match contract_type {
            ContractType::Call => Classification::Buy,
            ContractType::Put => Classification::Sell,
        });
        self.tick();
        let stake = self
            .gateway
            .state
            .lock()
            .sent
            .last()
            .map(|o| o.stake)
            .unwrap_or_default();
        let contract_id = self.accept();
        self.advance(Duration::from_secs(5));
        self.settle(contract_id, stake, win);
        self.signals.set(Classification::Wait);
        self.advance(Duration::from_secs(self.risk.cooldown_secs + 1));
    }
}
