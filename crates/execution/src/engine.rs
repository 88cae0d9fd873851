//! Session state machine: signal to order, order to settlement, settlement to stake.
//!
//! The engine is driven entirely from outside: the session runner feeds it
//! broker events and calls [`TradingEngine::poll`] on a timer. It never
//! sleeps or spawns, so every deadline (order retry, processing guard,
//! cooldown) is a timestamp compared against the `now` it is given.

use crate::analytics::SessionAnalytics;
use crate::debounce::Debouncer;
use crate::error::{ExecutionError, RiskBreach};
use crate::risk::{HardLimits, RiskCounters};
use crate::staking::{MartingaleStaking, StakeOutcome};
use chrono::{NaiveDate, Utc};
use deriv_bot_core::{
    ConnectionState, ContractType, ContractUpdate, MartingaleConfig, NullJournal, OpenOrder,
    OperatorNotifier, OrderAck, OrderGateway, OrderRequest, RetryPolicy, RiskConfig,
    SessionStats, SessionSummary, SignalEngine, StopReason, TradeClosed, TradeConfig,
    TradeJournal, TradeOpened, TradeResult, TradeSessionState,
};
use rust_decimal::Decimal;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// A buy request that has been sent but not yet accepted.
#[derive(Debug, Clone)]
struct PendingOrder {
    /// Correlation id of the request in flight, `None` while waiting to retry.
    req_id: Option<u64>,
    request: OrderRequest,
    entry_price: Decimal,
    rejections: u32,
    retry_at: Option<Instant>,
}

pub struct TradingEngine {
    gateway: Arc<dyn OrderGateway>,
    signals: Box<dyn SignalEngine>,
    notifier: Arc<dyn OperatorNotifier>,
    journal: Box<dyn TradeJournal>,
    debouncer: Debouncer,

    limits: HardLimits,
    order_retry: RetryPolicy,
    processing_timeout: Duration,
    cooldown: Duration,
    window: usize,

    config: TradeConfig,
    state: TradeSessionState,
    stats: SessionStats,
    risk: RiskCounters,
    analytics: SessionAnalytics,
    staking: MartingaleStaking,

    /// Set the instant a signal is accepted; the only authority for "may act".
    guard: Option<Instant>,
    cooldown_until: Option<Instant>,
    pending: Option<PendingOrder>,
    open_order: Option<OpenOrder>,
    last_price: Option<Decimal>,
    trades: Vec<TradeResult>,
    stop_reason: Option<StopReason>,
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

impl TradingEngine {
    pub fn new(
        gateway: Arc<dyn OrderGateway>,
        signals: Box<dyn SignalEngine>,
        notifier: Arc<dyn OperatorNotifier>,
        risk: &RiskConfig,
        martingale: MartingaleConfig,
    ) -> Self {
        let config = TradeConfig::default();
        let window = martingale.window;
        Self {
            gateway,
            signals,
            notifier,
            journal: Box::new(NullJournal),
            debouncer: Debouncer::new(Duration::from_secs(risk.notify_debounce_secs)),
            limits: HardLimits::from(risk),
            order_retry: risk.order_retry(),
            processing_timeout: Duration::from_secs(risk.processing_timeout_secs),
            cooldown: Duration::from_secs(risk.cooldown_secs),
            window,
            staking: MartingaleStaking::new(martingale, config.base_stake),
            config,
            state: TradeSessionState::Idle,
            stats: SessionStats::default(),
            risk: RiskCounters::new(today()),
            analytics: SessionAnalytics::new(window, Decimal::ZERO),
            guard: None,
            cooldown_until: None,
            pending: None,
            open_order: None,
            last_price: None,
            trades: Vec::new(),
            stop_reason: None,
        }
    }

    #[must_use]
    pub fn with_journal(mut self, journal: Box<dyn TradeJournal>) -> Self {
        self.journal = journal;
        self
    }

    #[must_use]
    pub fn state(&self) -> TradeSessionState {
        self.state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            TradeSessionState::Running | TradeSessionState::WaitingResult
        )
    }

    /// True while a signal has been acted on and not yet resolved.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.guard.is_some()
    }

    #[must_use]
    pub fn config(&self) -> &TradeConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    #[must_use]
    pub fn risk(&self) -> &RiskCounters {
        &self.risk
    }

    #[must_use]
    pub fn analytics(&self) -> &SessionAnalytics {
        &self.analytics
    }

    #[must_use]
    pub fn current_stake(&self) -> Decimal {
        self.staking.current_stake()
    }

    #[must_use]
    pub fn open_order(&self) -> Option<&OpenOrder> {
        self.open_order.as_ref()
    }

    #[must_use]
    pub fn trades(&self) -> &[TradeResult] {
        &self.trades
    }

    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Sets the parameters for the next session.
    ///
    /// # Errors
    ///
    /// `SessionActive` while a session is running.
    pub fn configure(&mut self, mut config: TradeConfig) -> Result<String, ExecutionError> {
        if self.is_active() {
            return Err(ExecutionError::SessionActive);
        }

        let mut note = String::new();
        if config.base_stake < self.limits.min_stake {
            warn!(
                requested = %config.base_stake,
                min = %self.limits.min_stake,
                "Stake below minimum, clamping"
            );
            note = format!(" (raised from {} to minimum)", config.base_stake);
            config.base_stake = self.limits.min_stake;
        }

        self.staking.reset(config.base_stake);
        let target = if config.is_unlimited() {
            "unlimited".to_string()
        } else {
            config.target_trades.to_string()
        };
        let message = format!(
            "Configured {}: stake {}{note}, duration {}{}, target trades {target}",
            config.symbol, config.base_stake, config.duration, config.duration_unit
        );
        info!(
            symbol = %config.symbol,
            stake = %config.base_stake,
            duration = config.duration,
            unit = %config.duration_unit,
            target_trades = config.target_trades,
            "Session configured"
        );
        self.config = config;
        Ok(message)
    }

    /// Starts a fresh session.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if a session is active, `NotReady` if the broker
    /// connection is not authorized. Neither changes any state.
    pub fn start(&mut self) -> Result<String, ExecutionError> {
        if self.is_active() {
            return Err(ExecutionError::AlreadyRunning);
        }
        if !self.gateway.is_ready() {
            return Err(ExecutionError::NotReady);
        }

        let balance = self.gateway.balance().unwrap_or_default();
        self.stats = SessionStats::starting_at(balance);
        self.risk = RiskCounters::new(today());
        self.analytics = SessionAnalytics::new(self.window, balance);
        self.staking.reset(self.config.base_stake);
        self.guard = None;
        self.cooldown_until = None;
        self.pending = None;
        self.open_order = None;
        self.last_price = None;
        self.trades.clear();
        self.stop_reason = None;
        self.signals.clear_history();

        if !self.gateway.subscribe_ticks(&self.config.symbol) {
            warn!(symbol = %self.config.symbol, "Tick subscription not sent");
        }
        self.state = TradeSessionState::Running;

        info!(
            symbol = %self.config.symbol,
            stake = %self.config.base_stake,
            balance = %balance,
            "Auto trading started"
        );
        Ok(format!(
            "Auto trading started on {} with stake {} (balance {} {})",
            self.config.symbol,
            self.config.base_stake,
            balance,
            self.gateway.currency()
        ))
    }

    /// Stops the running session and returns its summary.
    ///
    /// # Errors
    ///
    /// `NotRunning` when idle or already stopped.
    pub fn stop(&mut self) -> Result<SessionSummary, ExecutionError> {
        if !self.is_active() {
            return Err(ExecutionError::NotRunning);
        }
        Ok(self.finish(StopReason::OperatorRequest))
    }

    pub fn on_tick(&mut self, price: Decimal, now: Instant) {
        self.signals.add_tick(price);
        self.last_price = Some(price);
        self.expire_guard(now);

        if self.state != TradeSessionState::Running || self.guard.is_some() {
            return;
        }
        if self.cooldown_until.is_some_and(|until| now < until) {
            return;
        }

        let analysis = self.signals.analyze();
        let Some(contract_type) = analysis.classification.contract_type() else {
            debug!(rationale = %analysis.rationale, "No entry");
            return;
        };

        info!(
            classification = %analysis.classification,
            confidence = analysis.confidence,
            rationale = %analysis.rationale,
            "Signal accepted"
        );
        self.place_order(contract_type, now);
    }

    fn place_order(&mut self, contract_type: ContractType, now: Instant) {
        if self.state != TradeSessionState::Running || self.guard.is_some() {
            return;
        }
        self.guard = Some(now);
        self.state = TradeSessionState::WaitingResult;

        let stake = self.staking.current_stake().max(self.limits.min_stake);
        let balance = self.current_balance();
        self.risk.roll_day(today());

        if let Err(breach) = self.limits.check_order(
            stake,
            balance,
            self.stats.starting_balance,
            self.risk.daily_loss,
        ) {
            self.halt(&breach);
            return;
        }

        let request = OrderRequest {
            symbol: self.config.symbol.clone(),
            contract_type,
            stake,
            duration: self.config.duration,
            duration_unit: self.config.duration_unit,
            currency: self.gateway.currency(),
        };
        self.submit(PendingOrder {
            req_id: None,
            request,
            entry_price: self.last_price.unwrap_or_default(),
            rejections: 0,
            retry_at: None,
        });
    }

    fn submit(&mut self, mut pending: PendingOrder) {
        match self.gateway.send_order(&pending.request) {
            Some(req_id) => {
                info!(
                    req_id,
                    contract_type = %pending.request.contract_type,
                    stake = %pending.request.stake,
                    attempt = pending.rejections + 1,
                    "Buy request sent"
                );
                pending.req_id = Some(req_id);
                pending.retry_at = None;
                self.pending = Some(pending);
            }
            None => {
                error!(
                    contract_type = %pending.request.contract_type,
                    "Failed to send buy request"
                );
                self.release_guard();
                if self.debouncer.should_emit("send_failed") {
                    self.notifier
                        .on_error("Failed to send buy request, waiting for the next signal");
                }
            }
        }
    }

    pub fn on_order_ack(&mut self, ack: OrderAck, now: Instant) {
        let req_id = ack.req_id();
        let matches = self
            .pending
            .as_ref()
            .is_some_and(|p| p.req_id == Some(req_id));
        if !matches {
            debug!(req_id, "Ack for unknown request ignored");
            return;
        }
        let Some(mut pending) = self.pending.take() else {
            return;
        };

        match ack {
            OrderAck::Accepted {
                contract_id,
                buy_price,
                ..
            } => {
                let order = OpenOrder {
                    contract_id,
                    contract_type: pending.request.contract_type,
                    entry_price: pending.entry_price,
                    stake: pending.request.stake,
                };
                if !self.gateway.subscribe_contract(contract_id) {
                    warn!(contract_id, "Contract subscription not sent");
                }
                info!(contract_id, buy_price = %buy_price, "Order accepted");
                self.notifier.on_trade_opened(&TradeOpened {
                    contract_type: order.contract_type,
                    entry_price: order.entry_price,
                    stake: order.stake,
                    trade_number: self.stats.total_trades + 1,
                    target_trades: self.config.target_trades,
                });
                self.open_order = Some(order);
            }
            OrderAck::Rejected { code, message, .. } => {
                pending.rejections += 1;
                if self.order_retry.is_exhausted(pending.rejections) {
                    error!(code = %code, attempts = pending.rejections, "Buy retries exhausted");
                    self.abort(
                        StopReason::OrderRetriesExhausted,
                        &format!(
                            "buy rejected {} times, last error {code}: {message}",
                            pending.rejections
                        ),
                    );
                    return;
                }

                let delay = self.order_retry.jittered_delay_for(pending.rejections);
                warn!(
                    code = %code,
                    message = %message,
                    attempt = pending.rejections,
                    delay = ?delay,
                    "Buy rejected, retrying"
                );
                self.notify_progress(
                    "order_retry",
                    &format!(
                        "Buy rejected ({code}), retrying in {:.1}s (attempt {}/{})",
                        delay.as_secs_f64(),
                        pending.rejections,
                        self.order_retry.max_attempts
                    ),
                );
                pending.req_id = None;
                pending.retry_at = Some(now + delay);
                self.pending = Some(pending);
            }
        }
    }

    pub fn on_contract_update(&mut self, update: ContractUpdate, now: Instant) {
        if !update.is_settled() {
            return;
        }

        let tracked = self
            .open_order
            .as_ref()
            .is_some_and(|o| o.contract_id == update.contract_id);
        if !tracked {
            warn!(
                contract_id = update.contract_id,
                profit = %update.profit,
                "Settlement for untracked contract ignored"
            );
            self.notify_progress(
                "untracked_settlement",
                &format!(
                    "Ignored settlement for untracked contract {} (profit {})",
                    update.contract_id, update.profit
                ),
            );
            return;
        }
        let Some(order) = self.open_order.take() else {
            return;
        };
        self.settle(order, &update, now);
    }

    fn settle(&mut self, order: OpenOrder, update: &ContractUpdate, now: Instant) {
        let is_win = update.is_win();
        let profit = update.profit;
        let level = self.risk.martingale_level;

        self.stats.record_outcome(profit, is_win);
        self.analytics.record_outcome(is_win);
        self.risk.roll_day(today());
        let balance = self.current_balance();

        let trade = TradeResult {
            trade_number: self.stats.total_trades,
            contract_id: order.contract_id,
            contract_type: order.contract_type,
            entry_price: update.entry_spot.unwrap_or(order.entry_price),
            exit_price: update.exit_spot,
            stake: order.stake,
            payout: update.payout.or(update.sell_price).unwrap_or_default(),
            profit,
            is_win,
            martingale_level: level,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.journal.record_trade(&trade) {
            warn!(error = %e, contract_id = trade.contract_id, "Failed to journal trade");
        }
        self.trades.push(trade);

        let staking = if is_win {
            Ok(self.staking.on_win(&mut self.risk, &mut self.analytics))
        } else {
            self.staking.on_loss(
                profit,
                balance,
                &self.limits,
                &mut self.risk,
                &mut self.analytics,
            )
        };
        if let Ok(StakeOutcome::Abandoned) = staking {
            warn!(
                max_level = self.staking.config().max_level,
                "Martingale ceiling reached, back to base stake"
            );
        }

        info!(
            contract_id = order.contract_id,
            is_win,
            profit = %profit,
            balance = %balance,
            next_stake = %self.staking.current_stake(),
            outcome = ?staking,
            "Trade settled"
        );
        self.notifier.on_trade_closed(&TradeClosed {
            is_win,
            profit,
            balance,
            trade_number: self.stats.total_trades,
            target_trades: self.config.target_trades,
            next_stake: self.staking.current_stake(),
        });

        self.guard = None;
        self.cooldown_until = Some(now + self.cooldown);

        if let Err(breach) = staking {
            self.halt(&breach);
            return;
        }
        if !self.config.is_unlimited() && self.stats.total_trades >= self.config.target_trades {
            info!(target = self.config.target_trades, "Target trade count reached");
            self.finish(StopReason::TargetReached);
            return;
        }
        self.state = TradeSessionState::Running;
    }

    pub fn on_balance(&mut self, balance: Decimal) {
        if !self.is_active() {
            return;
        }
        self.stats.update_balance(balance);
        self.analytics.update_balance(balance);
    }

    pub fn on_connection_state(&mut self, state: ConnectionState) {
        if !self.is_active() {
            return;
        }
        match state {
            ConnectionState::Ready => {
                // Subscriptions do not survive a reconnect or re-authorization.
                self.gateway.subscribe_ticks(&self.config.symbol);
                if let Some(order) = &self.open_order {
                    self.gateway.subscribe_contract(order.contract_id);
                }
                info!(symbol = %self.config.symbol, "Connection ready, subscriptions restored");
                self.notify_progress("connection", "Connection restored, trading resumed");
            }
            ConnectionState::Reconnecting => {
                self.notify_progress("connection", "Connection lost, reconnecting");
            }
            ConnectionState::Authorizing => {
                warn!("Broker session re-authorizing, trading paused");
                self.notify_progress("connection", "Re-authorizing with broker");
            }
            ConnectionState::Failed => {
                error!("Broker connection failed, ending session");
                self.abort(StopReason::ConnectionLost, "broker connection failed");
            }
            _ => {}
        }
    }

    /// Broker business errors (insufficient funds, rate limits, ...).
    pub fn on_broker_error(&mut self, code: &str, message: &str) {
        warn!(code, message, "Broker error");
        if self.debouncer.should_emit(code) {
            self.notifier.on_error(&format!("Broker error {code}: {message}"));
        }
    }

    /// Services deadlines: processing guard timeout and scheduled order retries.
    pub fn poll(&mut self, now: Instant) {
        self.expire_guard(now);

        let due = self
            .pending
            .as_ref()
            .and_then(|p| p.retry_at)
            .is_some_and(|at| now >= at);
        if due && self.state == TradeSessionState::WaitingResult {
            if let Some(pending) = self.pending.take() {
                self.submit(pending);
            }
        }
    }

    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        let mut summary = SessionSummary::from_stats(&self.stats);
        summary.max_drawdown = self.analytics.max_drawdown();
        summary.recoveries_succeeded = self.analytics.recoveries_succeeded;
        summary.recoveries_failed = self.analytics.recoveries_failed;
        summary.stop_reason = self.stop_reason;
        summary
    }

    /// Human-readable report of the session and the latest indicator readings.
    #[must_use]
    pub fn status(&self) -> String {
        let signal = self.signals.stats();
        let mut out = String::new();

        let _ = writeln!(out, "State: {}", self.state);
        let _ = writeln!(
            out,
            "Symbol: {}  stake {} (base {})  duration {}{}",
            self.config.symbol,
            self.staking.current_stake(),
            self.staking.base_stake(),
            self.config.duration,
            self.config.duration_unit
        );
        match signal.current_price {
            Some(price) => {
                let _ = writeln!(
                    out,
                    "Price: {price}  ticks {}  trend {}",
                    signal.tick_count, signal.trend
                );
            }
            None => {
                let _ = writeln!(out, "Price: n/a  ticks {}", signal.tick_count);
            }
        }
        if !signal.indicators.is_empty() {
            let readings: Vec<String> = signal
                .indicators
                .iter()
                .map(|(name, value)| format!("{name} {value:.2}"))
                .collect();
            let _ = writeln!(out, "Indicators: {}", readings.join(", "));
        }
        let _ = writeln!(
            out,
            "Trades: {} ({}W / {}L)  win rate {:.1}%  rolling {:.0}%",
            self.stats.total_trades,
            self.stats.wins,
            self.stats.losses,
            self.stats.win_rate(),
            self.analytics.rolling_win_rate() * 100.0
        );
        let _ = writeln!(
            out,
            "P/L: {:+.2}  balance {:.2}  drawdown {:.2} (max {:.2})",
            self.stats.total_profit,
            self.stats.current_balance,
            self.analytics.current_drawdown(),
            self.analytics.max_drawdown()
        );
        let _ = write!(
            out,
            "Risk: level {}  streak {}  daily loss {:.2}/{:.2}",
            self.risk.martingale_level,
            self.risk.consecutive_losses,
            self.risk.daily_loss,
            self.limits.max_daily_loss
        );
        if let Some(order) = &self.open_order {
            let _ = write!(
                out,
                "\nOpen: {} #{} stake {}",
                order.contract_type, order.contract_id, order.stake
            );
        }
        out
    }

    fn current_balance(&self) -> Decimal {
        self.gateway.balance().unwrap_or(self.stats.current_balance)
    }

    fn release_guard(&mut self) {
        self.guard = None;
        self.pending = None;
        if self.state == TradeSessionState::WaitingResult {
            self.state = TradeSessionState::Running;
        }
    }

    fn expire_guard(&mut self, now: Instant) {
        let Some(since) = self.guard else {
            return;
        };
        let elapsed = now.saturating_duration_since(since);
        if elapsed < self.processing_timeout {
            return;
        }

        warn!(
            elapsed = ?elapsed,
            contract_id = ?self.open_order.as_ref().map(|o| o.contract_id),
            "Processing guard timed out, resetting order state"
        );
        self.open_order = None;
        self.release_guard();
        self.notifier.on_error(&format!(
            "No result after {}s, order state reset",
            elapsed.as_secs()
        ));
    }

    fn notify_progress(&self, key: &str, message: &str) {
        if self.debouncer.should_emit(key) {
            self.notifier.on_progress(message);
        }
    }

    fn halt(&mut self, breach: &RiskBreach) {
        error!(%breach, "Risk limit breached");
        self.abort(breach.stop_reason(), &breach.to_string());
    }

    fn abort(&mut self, reason: StopReason, detail: &str) {
        self.notifier
            .on_error(&format!("Session stopped ({reason}): {detail}"));
        self.finish(reason);
    }

    fn finish(&mut self, reason: StopReason) -> SessionSummary {
        if !self.gateway.unsubscribe_ticks() {
            debug!("Tick unsubscribe not sent");
        }
        self.guard = None;
        self.pending = None;
        self.open_order = None;
        self.cooldown_until = None;
        self.state = TradeSessionState::Stopped;
        self.stop_reason = Some(reason);

        let summary = self.summary();
        if let Err(e) = self.journal.record_summary(&summary) {
            warn!(error = %e, "Failed to journal session summary");
        }
        info!(
            reason = %reason,
            trades = summary.total_trades,
            net_profit = %summary.net_profit,
            "Session finished"
        );
        self.notifier.on_session_complete(&summary);
        summary
    }
}
