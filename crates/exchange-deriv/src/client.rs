//! Deriv WebSocket client with authorization fallback, ping/pong health
//! monitoring and capped-backoff reconnection.
//!
//! # Architecture
//!
//! ```text
//! DerivClient::connect()
//!        │
//!        ├─► Spawns supervisor task (one per connect)
//!        │   ├─► opens transport, authorizes, runs the session loop
//!        │   ├─► spawns heartbeat task once the session is Ready
//!        │   └─► on loss: backoff, network probe, reconnect (bounded)
//!        │
//!        └─► Events flow to the single mpsc::UnboundedReceiver<ClientEvent>
//! ```
//!
//! All mutable client state lives behind one mutex. Every transport session
//! gets a fresh session number; timers and tasks that belong to an older
//! session notice the mismatch and do nothing.

use crate::error::{ApiError, AuthErrorKind, DerivError};
use crate::health::{HealthConfig, HealthState, HeartbeatAction};
use crate::probe::{NetworkProbe, TcpProbe};
use crate::protocol::{
    self, AuthorizeBody, AuthorizeRequest, BalanceRequest, BuyRequest, ContractsForRequest,
    ForgetAllRequest, Inbound, OpenContractRequest, PingRequest, TicksRequest,
};
use deriv_bot_core::{
    AccountSnapshot, AccountType, BalanceUpdate, BrokerConfig, ClientEvent, ConnectionState,
    Credentials, OrderAck, OrderGateway, OrderRequest, RetryPolicy,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type Transport = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the Deriv client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Full endpoint URL including `app_id`.
    pub url: String,
    pub initial_account: AccountType,
    pub connect_timeout: Duration,
    /// How long to wait for an authorize response before treating it as a transient failure.
    pub auth_timeout: Duration,
    pub auth_retry: RetryPolicy,
    pub reconnect: RetryPolicy,
    pub health: HealthConfig,
    pub probe_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_broker(&BrokerConfig::default())
    }
}

impl ClientConfig {
    #[must_use]
    pub fn from_broker(config: &BrokerConfig) -> Self {
        Self {
            url: config.url(),
            initial_account: config.initial_account,
            connect_timeout: Duration::from_secs(15),
            auth_timeout: Duration::from_secs(config.auth_timeout_secs),
            auth_retry: config.auth_retry(),
            reconnect: config.reconnect_retry(),
            health: HealthConfig::from_broker(config),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
        }
    }
}

/// Deriv tokens are 15 to 40 ASCII letters and digits.
#[must_use]
pub fn looks_like_token(token: &str) -> bool {
    (15..=40).contains(&token.len()) && token.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Checks that an endpoint is a usable `ws://` or `wss://` URL.
///
/// # Errors
///
/// Returns `DerivError::InvalidUrl` describing the problem.
pub fn validate_endpoint(url: &str) -> Result<Url, DerivError> {
    let parsed = Url::parse(url).map_err(|e| DerivError::invalid_url(url, e.to_string()))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(DerivError::invalid_url(url, "scheme must be ws or wss"));
    }
    if parsed.host_str().is_none() {
        return Err(DerivError::invalid_url(url, "missing host"));
    }
    Ok(parsed)
}

/// Handle to the broker connection. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct DerivClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    credentials: Credentials,
    probe: Option<Arc<dyn NetworkProbe>>,
    events: mpsc::UnboundedSender<ClientEvent>,
    state_tx: watch::Sender<ConnectionState>,
    shared: Mutex<Shared>,
}

struct Shared {
    state: ConnectionState,
    account_type: AccountType,
    account: Option<AccountSnapshot>,
    health: HealthState,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    close_tx: Option<mpsc::UnboundedSender<()>>,
    next_req_id: u64,
    tick_symbol: Option<String>,
    tick_subscription: Option<String>,
    contract_subscriptions: HashSet<u64>,
    balance_subscribed: bool,
    auth_req_id: Option<u64>,
    auth_attempts: u32,
    last_auth_error: Option<String>,
    reached_ready: bool,
    generation: u64,
    session: u64,
    supervisor: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl Shared {
    fn new(account_type: AccountType) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            account_type,
            account: None,
            health: HealthState::default(),
            outbound: None,
            close_tx: None,
            next_req_id: 0,
            tick_symbol: None,
            tick_subscription: None,
            contract_subscriptions: HashSet::new(),
            balance_subscribed: false,
            auth_req_id: None,
            auth_attempts: 0,
            last_auth_error: None,
            reached_ready: false,
            generation: 0,
            session: 0,
            supervisor: None,
            heartbeat: None,
        }
    }

    fn next_req_id(&mut self) -> u64 {
        self.next_req_id += 1;
        self.next_req_id
    }

    /// Authorize replies count only for the request currently in flight.
    fn is_pending_authorize(&self, req_id: Option<u64>) -> bool {
        req_id.is_some() && req_id == self.auth_req_id
    }

    fn clear_subscriptions(&mut self) {
        self.tick_symbol = None;
        self.tick_subscription = None;
        self.contract_subscriptions.clear();
        self.balance_subscribed = false;
    }
}

enum SessionEnd {
    /// `disconnect()` or a newer `connect()` took over.
    Superseded,
    Closed { reason: String, reached_ready: bool },
}

impl DerivClient {
    /// Creates a client probing the endpoint's own host before reconnecting.
    ///
    /// Returns the handle and the receiver for every event the client emits.
    pub fn new(
        config: ClientConfig,
        credentials: Credentials,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let probe = match TcpProbe::for_endpoint(&config.url, config.probe_timeout) {
            Ok(probe) => Some(Arc::new(probe) as Arc<dyn NetworkProbe>),
            Err(e) => {
                warn!(error = %e, "Network probe disabled");
                None
            }
        };
        Self::build(config, credentials, probe)
    }

    /// Creates a client with a custom reachability probe.
    pub fn with_probe(
        config: ClientConfig,
        credentials: Credentials,
        probe: Arc<dyn NetworkProbe>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        Self::build(config, credentials, Some(probe))
    }

    fn build(
        config: ClientConfig,
        credentials: Credentials,
        probe: Option<Arc<dyn NetworkProbe>>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        for account in [AccountType::Demo, AccountType::Real] {
            if let Some(token) = credentials.get(account) {
                if !looks_like_token(token.expose_secret()) {
                    warn!(%account, "Token format looks unusual (expected 15-40 alphanumeric characters)");
                }
            }
        }

        let (events, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Mutex::new(Shared::new(config.initial_account));

        let inner = Arc::new(Inner {
            config,
            credentials,
            probe,
            events,
            state_tx,
            shared,
        });
        (Self { inner }, events_rx)
    }

    /// Starts connecting in the background. No-op while a connection is active.
    ///
    /// An endpoint that cannot be parsed moves the client straight to `Failed`.
    pub fn connect(&self) {
        let inner = &self.inner;
        let mut shared = inner.shared.lock();
        if shared.state.is_active() {
            debug!(state = %shared.state, "connect() ignored, connection already active");
            return;
        }

        if let Err(e) = validate_endpoint(&inner.config.url) {
            error!(error = %e, "Cannot connect");
            inner.set_state(&mut shared, ConnectionState::Failed);
            return;
        }

        shared.generation += 1;
        let generation = shared.generation;
        inner.set_state(&mut shared, ConnectionState::Connecting);
        shared.supervisor = Some(tokio::spawn(run_supervisor(Arc::clone(inner), generation)));
    }

    /// Closes the transport and stops all background work. Idempotent.
    pub fn disconnect(&self) {
        let (supervisor, heartbeat) = {
            let mut shared = self.inner.shared.lock();
            shared.generation += 1;
            shared.session += 1;
            shared.outbound = None;
            shared.close_tx = None;
            shared.auth_req_id = None;
            shared.health.reset();
            shared.clear_subscriptions();
            self.inner
                .set_state(&mut shared, ConnectionState::Disconnected);
            (shared.supervisor.take(), shared.heartbeat.take())
        };

        if let Some(handle) = heartbeat {
            handle.abort();
        }
        if let Some(handle) = supervisor {
            handle.abort();
            info!("Disconnected from Deriv");
        }
    }

    /// Re-authorizes with the other account's credential.
    ///
    /// Returns true without doing anything if `account` is already active,
    /// and false without changing anything if no credential exists for it.
    pub fn switch_account(&self, account: AccountType) -> bool {
        let mut shared = self.inner.shared.lock();
        if shared.account_type == account {
            return true;
        }
        if !self.inner.credentials.has(account) {
            warn!(%account, "No credential configured, account unchanged");
            return false;
        }

        info!(from = %shared.account_type, to = %account, "Switching account");
        shared.account_type = account;
        shared.auth_attempts = 0;
        shared.auth_req_id = None;
        shared.account = None;
        shared.clear_subscriptions();

        let session_open = shared.outbound.is_some()
            && matches!(
                shared.state,
                ConnectionState::Connected | ConnectionState::Authorizing | ConnectionState::Ready
            );
        if session_open {
            self.inner.begin_authorize(&mut shared);
        }
        true
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.connection_state() == ConnectionState::Ready
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    #[must_use]
    pub fn account_type(&self) -> AccountType {
        self.inner.shared.lock().account_type
    }

    #[must_use]
    pub fn account(&self) -> Option<AccountSnapshot> {
        self.inner.shared.lock().account.clone()
    }

    /// Most recent authorization failure, kept for operator reporting.
    #[must_use]
    pub fn last_auth_error(&self) -> Option<String> {
        self.inner.shared.lock().last_auth_error.clone()
    }

    /// Broker-assigned id of the live tick stream, once the first tick arrived.
    #[must_use]
    pub fn tick_subscription(&self) -> Option<String> {
        self.inner.shared.lock().tick_subscription.clone()
    }

    /// Watch channel mirroring every connection state transition.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Waits until the client is `Ready`. Returns false on timeout or `Failed`.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.state_changes();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| matches!(s, ConnectionState::Ready | ConnectionState::Failed)),
        )
        .await;
        matches!(waited, Ok(Ok(state)) if *state == ConnectionState::Ready)
    }

    /// Sends a stake-based buy request. Returns its request id.
    pub fn buy(&self, order: &OrderRequest) -> Option<u64> {
        let req_id = self.inner.send_when_ready("buy", |req_id, _| {
            protocol::encode(&BuyRequest::from_order(order, req_id))
        })?;
        info!(
            req_id,
            contract_type = %order.contract_type,
            stake = %order.stake,
            symbol = %order.symbol,
            "Buy request sent"
        );
        Some(req_id)
    }

    pub fn subscribe_ticks(&self, symbol: &str) -> bool {
        self.inner
            .send_when_ready("ticks", |req_id, shared| {
                shared.tick_symbol = Some(symbol.to_string());
                shared.tick_subscription = None;
                protocol::encode(&TicksRequest {
                    ticks: symbol,
                    subscribe: 1,
                    req_id,
                })
            })
            .is_some()
    }

    pub fn unsubscribe_ticks(&self) -> bool {
        self.inner
            .send_when_ready("forget_all", |req_id, shared| {
                shared.tick_symbol = None;
                shared.tick_subscription = None;
                protocol::encode(&ForgetAllRequest {
                    forget_all: "ticks",
                    req_id,
                })
            })
            .is_some()
    }

    /// Subscribes to updates for a contract. Already-streaming contracts are not re-requested.
    pub fn subscribe_contract(&self, contract_id: u64) -> bool {
        {
            let shared = self.inner.shared.lock();
            if shared.state == ConnectionState::Ready
                && shared.contract_subscriptions.contains(&contract_id)
            {
                return true;
            }
        }
        self.inner
            .send_when_ready("proposal_open_contract", |req_id, shared| {
                shared.contract_subscriptions.insert(contract_id);
                protocol::encode(&OpenContractRequest {
                    proposal_open_contract: 1,
                    contract_id,
                    subscribe: 1,
                    req_id,
                })
            })
            .is_some()
    }

    pub fn subscribe_balance(&self) -> bool {
        self.inner
            .send_when_ready("balance", |req_id, shared| {
                shared.balance_subscribed = true;
                protocol::encode(&BalanceRequest {
                    balance: 1,
                    subscribe: 1,
                    req_id,
                })
            })
            .is_some()
    }

    /// Asks for the contract catalogue of a symbol; the answer arrives as `ClientEvent::ContractsFor`.
    pub fn contracts_for(&self, symbol: &str) -> bool {
        self.inner
            .send_when_ready("contracts_for", |req_id, shared| {
                let currency = shared
                    .account
                    .as_ref()
                    .map_or("USD", |a| a.currency.as_str());
                protocol::encode(&ContractsForRequest {
                    contracts_for: symbol,
                    currency,
                    product_type: "basic",
                    req_id,
                })
            })
            .is_some()
    }
}

impl OrderGateway for DerivClient {
    fn is_ready(&self) -> bool {
        DerivClient::is_ready(self)
    }

    fn balance(&self) -> Option<Decimal> {
        self.inner.shared.lock().account.as_ref().map(|a| a.balance)
    }

    fn currency(&self) -> String {
        self.inner
            .shared
            .lock()
            .account
            .as_ref()
            .map_or_else(|| "USD".to_string(), |a| a.currency.clone())
    }

    fn send_order(&self, order: &OrderRequest) -> Option<u64> {
        self.buy(order)
    }

    fn subscribe_ticks(&self, symbol: &str) -> bool {
        DerivClient::subscribe_ticks(self, symbol)
    }

    fn unsubscribe_ticks(&self) -> bool {
        DerivClient::unsubscribe_ticks(self)
    }

    fn subscribe_contract(&self, contract_id: u64) -> bool {
        DerivClient::subscribe_contract(self, contract_id)
    }
}

// ============================================================================
// Shared-state transitions
// ============================================================================

impl Inner {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, shared: &mut Shared, to: ConnectionState) {
        let from = shared.state;
        if from == to {
            return;
        }
        shared.state = to;
        info!(%from, %to, "Connection state changed");
        self.state_tx.send_replace(to);
        self.emit(ClientEvent::ConnectionStateChanged { from, to });
    }

    fn send_locked(&self, shared: &Shared, text: String) -> bool {
        match &shared.outbound {
            Some(outbound) => outbound.send(Message::Text(text)).is_ok(),
            None => false,
        }
    }

    fn send_when_ready<F>(&self, what: &str, build: F) -> Option<u64>
    where
        F: FnOnce(u64, &mut Shared) -> Result<String, DerivError>,
    {
        let mut shared = self.shared.lock();
        if shared.state != ConnectionState::Ready {
            debug!(request = what, state = %shared.state, "Request refused, client not ready");
            return None;
        }
        let req_id = shared.next_req_id();
        let text = match build(req_id, &mut *shared) {
            Ok(text) => text,
            Err(e) => {
                warn!(request = what, error = %e, "Failed to encode request");
                return None;
            }
        };
        self.send_locked(&shared, text).then_some(req_id)
    }

    fn close_transport(&self, shared: &mut Shared) {
        if let Some(close_tx) = shared.close_tx.take() {
            let _ = close_tx.send(());
        }
    }

    /// Drops everything tied to the current transport session.
    fn detach_session(&self, shared: &mut Shared) {
        shared.session += 1;
        shared.outbound = None;
        shared.close_tx = None;
        shared.auth_req_id = None;
        shared.health.reset();
        shared.clear_subscriptions();
        if let Some(heartbeat) = shared.heartbeat.take() {
            heartbeat.abort();
        }
    }

    fn begin_authorize(self: &Arc<Self>, shared: &mut Shared) {
        let account = shared.account_type;
        let Some(token) = self.credentials.get(account) else {
            let reason = DerivError::MissingCredential(account).to_string();
            error!(%account, "No credential configured");
            shared.last_auth_error = Some(reason.clone());
            self.fall_back_or_fail(shared, &reason);
            return;
        };

        let req_id = shared.next_req_id();
        let text = match protocol::encode(&AuthorizeRequest {
            authorize: token.expose_secret(),
            req_id,
        }) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to encode authorize request");
                return;
            }
        };

        shared.auth_req_id = Some(req_id);
        self.set_state(shared, ConnectionState::Authorizing);
        info!(%account, attempt = shared.auth_attempts + 1, "Authorizing");
        if !self.send_locked(shared, text) {
            warn!("Authorize request could not be queued");
            return;
        }

        let inner = Arc::clone(self);
        let session = shared.session;
        let timeout = self.config.auth_timeout;
        tokio::spawn(async move {
            sleep(timeout).await;
            let mut shared = inner.shared.lock();
            if shared.session == session
                && shared.auth_req_id == Some(req_id)
                && shared.state == ConnectionState::Authorizing
            {
                warn!(req_id, timeout = ?timeout, "Authorization timed out");
                inner.handle_auth_failure(
                    &mut shared,
                    ApiError::new("AuthTimeout", "no authorize response"),
                );
            }
        });
    }

    fn handle_auth_failure(self: &Arc<Self>, shared: &mut Shared, error: ApiError) {
        shared.auth_req_id = None;
        shared.last_auth_error = Some(error.to_string());

        match error.auth_kind() {
            AuthErrorKind::Permanent => {
                error!(code = %error.code, account = %shared.account_type, "Credential rejected, not retrying");
                self.fall_back_or_fail(shared, &error.to_string());
            }
            AuthErrorKind::Transient => {
                shared.auth_attempts += 1;
                let policy = self.config.auth_retry;
                if policy.is_exhausted(shared.auth_attempts) {
                    error!(attempts = shared.auth_attempts, "Authorization retries exhausted");
                    self.fall_back_or_fail(shared, &error.to_string());
                    return;
                }

                let delay = policy.delay_for(shared.auth_attempts);
                warn!(
                    code = %error.code,
                    attempt = shared.auth_attempts,
                    delay = ?delay,
                    "Authorization failed, retrying"
                );
                let inner = Arc::clone(self);
                let session = shared.session;
                tokio::spawn(async move {
                    sleep(delay).await;
                    let mut shared = inner.shared.lock();
                    if shared.session == session
                        && shared.state == ConnectionState::Authorizing
                        && shared.auth_req_id.is_none()
                    {
                        inner.begin_authorize(&mut shared);
                    }
                });
            }
        }
    }

    /// Real account failed for good: try demo if possible, otherwise give up.
    fn fall_back_or_fail(self: &Arc<Self>, shared: &mut Shared, reason: &str) {
        if shared.account_type == AccountType::Real && self.credentials.has(AccountType::Demo) {
            warn!(reason, "Falling back to demo account");
            shared.account_type = AccountType::Demo;
            shared.auth_attempts = 0;
            shared.account = None;
            shared.clear_subscriptions();
            self.begin_authorize(shared);
            return;
        }

        error!(reason, "Authorization failed permanently");
        self.set_state(shared, ConnectionState::Failed);
        self.close_transport(shared);
    }

    fn on_authorized(self: &Arc<Self>, shared: &mut Shared, body: AuthorizeBody) {
        let snapshot = AccountSnapshot {
            account_id: body.loginid,
            balance: body.balance,
            currency: body.currency,
            is_virtual: body.is_virtual,
            account_type: shared.account_type,
        };
        info!(
            account_id = %snapshot.account_id,
            account = %snapshot.account_type,
            balance = %snapshot.balance,
            currency = %snapshot.currency,
            "Authorized"
        );

        let balance = BalanceUpdate {
            balance: snapshot.balance,
            currency: snapshot.currency.clone(),
        };
        shared.account = Some(snapshot);
        shared.auth_req_id = None;
        shared.auth_attempts = 0;
        shared.last_auth_error = None;
        shared.reached_ready = true;
        self.set_state(shared, ConnectionState::Ready);
        self.emit(ClientEvent::Balance(balance));
        if shared.heartbeat.is_none() {
            let session = shared.session;
            shared.heartbeat = Some(tokio::spawn(run_heartbeat(Arc::clone(self), session)));
        }

        if shared.balance_subscribed {
            return;
        }
        let req_id = shared.next_req_id();
        match protocol::encode(&BalanceRequest {
            balance: 1,
            subscribe: 1,
            req_id,
        }) {
            Ok(text) => shared.balance_subscribed = self.send_locked(shared, text),
            Err(e) => warn!(error = %e, "Failed to encode balance subscription"),
        }
    }

    fn on_api_error(
        self: &Arc<Self>,
        shared: &mut Shared,
        msg_type: Option<&str>,
        req_id: Option<u64>,
        error: ApiError,
    ) {
        match msg_type {
            Some("authorize") => {
                if shared.is_pending_authorize(req_id) {
                    self.handle_auth_failure(shared, error);
                } else {
                    warn!(req_id, pending = ?shared.auth_req_id, code = %error.code, "Ignoring stale authorize error");
                }
            }
            Some("buy") => {
                warn!(req_id, code = %error.code, message = %error.message, "Buy rejected");
                self.emit(ClientEvent::OrderAck(OrderAck::Rejected {
                    req_id: req_id.unwrap_or_default(),
                    code: error.code,
                    message: error.message,
                }));
            }
            _ if error.requires_authorization() => {
                warn!(msg_type, "Session lost authorization, re-authorizing");
                shared.clear_subscriptions();
                shared.auth_attempts = 0;
                self.begin_authorize(shared);
            }
            _ => {
                if error.is_rate_limit() {
                    warn!(msg_type, message = %error.message, "Rate limited by broker");
                } else {
                    warn!(msg_type, code = %error.code, message = %error.message, "Broker error");
                }
                self.emit(ClientEvent::BrokerError {
                    code: error.code,
                    message: error.message,
                });
            }
        }
    }

    fn handle_text(self: &Arc<Self>, session: u64, text: &str) {
        let inbound = match protocol::parse_inbound(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "Dropping malformed message");
                return;
            }
        };

        let mut shared = self.shared.lock();
        if shared.session != session {
            return;
        }

        match inbound {
            Inbound::Authorized { req_id, account } => {
                if shared.is_pending_authorize(req_id) {
                    self.on_authorized(&mut shared, account);
                } else {
                    warn!(
                        req_id,
                        pending = ?shared.auth_req_id,
                        account_id = %account.loginid,
                        "Ignoring stale authorize response"
                    );
                }
            }
            Inbound::Error {
                msg_type,
                req_id,
                error,
            } => self.on_api_error(&mut shared, msg_type.as_deref(), req_id, error),
            Inbound::Pong => {
                if shared.health.on_pong(Instant::now()) {
                    info!("Pong received, grace period cancelled");
                } else {
                    debug!("Pong received");
                }
            }
            Inbound::Tick {
                tick,
                subscription_id,
            } => {
                if subscription_id.is_some() {
                    shared.tick_subscription = subscription_id;
                }
                self.emit(ClientEvent::Tick(tick));
            }
            Inbound::Bought {
                req_id,
                contract_id,
                buy_price,
            } => {
                info!(req_id, contract_id, buy_price = %buy_price, "Buy accepted");
                shared.contract_subscriptions.insert(contract_id);
                self.emit(ClientEvent::OrderAck(OrderAck::Accepted {
                    req_id,
                    contract_id,
                    buy_price,
                }));
            }
            Inbound::Contract { update, .. } => {
                if update.is_settled() {
                    shared.contract_subscriptions.remove(&update.contract_id);
                }
                self.emit(ClientEvent::Contract(update));
            }
            Inbound::Balance(update) => {
                if let Some(account) = shared.account.as_mut() {
                    account.balance = update.balance;
                }
                self.emit(ClientEvent::Balance(update));
            }
            Inbound::ContractsFor { symbol, contracts } => {
                self.emit(ClientEvent::ContractsFor { symbol, contracts });
            }
            Inbound::Other(kind) => debug!(msg_type = %kind, "Ignoring message"),
        }
    }

    fn send_ping(&self, shared: &Shared) {
        match protocol::encode(&PingRequest::default()) {
            Ok(text) => {
                if !self.send_locked(shared, text) {
                    debug!("Ping not sent, no transport");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode ping"),
        }
    }

    fn is_generation(&self, generation: u64) -> bool {
        self.shared.lock().generation == generation
    }
}

// ============================================================================
// Background tasks
// ============================================================================

/// Connects, runs sessions and reconnects until the budget is spent or the
/// client is disconnected.
async fn run_supervisor(inner: Arc<Inner>, generation: u64) {
    let policy = inner.config.reconnect;
    let mut attempts: u32 = 0;

    loop {
        if !inner.is_generation(generation) {
            return;
        }

        info!(url = %inner.config.url, attempt = attempts, "Connecting to Deriv");
        let connected = tokio::time::timeout(
            inner.config.connect_timeout,
            connect_async(inner.config.url.as_str()),
        )
        .await;

        match connected {
            Ok(Ok((transport, _response))) => match run_session(&inner, generation, transport).await {
                SessionEnd::Superseded => return,
                SessionEnd::Closed {
                    reason,
                    reached_ready,
                } => {
                    warn!(reason = %reason, "Connection lost");
                    if reached_ready {
                        attempts = 0;
                    }
                }
            },
            Ok(Err(e)) => warn!(error = %e, attempt = attempts, "WebSocket connection failed"),
            Err(_) => warn!(timeout = ?inner.config.connect_timeout, "WebSocket connection timed out"),
        }

        {
            let mut shared = inner.shared.lock();
            if shared.generation != generation || shared.state == ConnectionState::Failed {
                return;
            }
            inner.detach_session(&mut shared);
            if policy.is_exhausted(attempts) {
                error!(attempts, "Max reconnection attempts exceeded");
                inner.set_state(&mut shared, ConnectionState::Failed);
                return;
            }
            inner.set_state(&mut shared, ConnectionState::Reconnecting);
        }

        let delay = policy.delay_for(attempts + 1);
        loop {
            info!(delay = ?delay, next_attempt = attempts + 1, max = policy.max_attempts, "Waiting before reconnect");
            sleep(delay).await;
            if !inner.is_generation(generation) {
                return;
            }
            let reachable = match &inner.probe {
                Some(probe) => probe.is_reachable().await,
                None => true,
            };
            if reachable {
                break;
            }
            warn!("Network unreachable, waiting without using a reconnection attempt");
        }
        attempts += 1;

        {
            let mut shared = inner.shared.lock();
            if shared.generation != generation {
                return;
            }
            inner.set_state(&mut shared, ConnectionState::Connecting);
        }
    }
}

/// Runs one transport session until it closes.
async fn run_session(inner: &Arc<Inner>, generation: u64, transport: Transport) -> SessionEnd {
    let (mut write, mut read) = transport.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let (close_tx, mut close_rx) = mpsc::unbounded_channel::<()>();

    let session = {
        let mut shared = inner.shared.lock();
        if shared.generation != generation {
            return SessionEnd::Superseded;
        }
        shared.session += 1;
        let session = shared.session;
        shared.outbound = Some(out_tx);
        shared.close_tx = Some(close_tx);
        shared.next_req_id = 0;
        shared.auth_attempts = 0;
        shared.reached_ready = false;
        shared.health.reset();
        shared.clear_subscriptions();
        inner.set_state(&mut shared, ConnectionState::Connected);
        inner.begin_authorize(&mut shared);
        session
    };

    let reason = loop {
        tokio::select! {
            Some(message) = out_rx.recv() => {
                if let Err(e) = write.send(message).await {
                    break format!("send failed: {e}");
                }
            }
            Some(()) = close_rx.recv() => {
                let _ = write.close().await;
                break "closed by client".to_string();
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => inner.handle_text(session, &text),
                Some(Ok(Message::Binary(data))) => {
                    if let Ok(text) = String::from_utf8(data) {
                        inner.handle_text(session, &text);
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        break format!("pong failed: {e}");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "connection closed".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("websocket error: {e}"),
                None => break "stream ended".to_string(),
            },
        }
    };

    let mut shared = inner.shared.lock();
    if shared.generation != generation {
        return SessionEnd::Superseded;
    }
    let reached_ready = shared.reached_ready;
    inner.detach_session(&mut shared);
    SessionEnd::Closed {
        reason,
        reached_ready,
    }
}

/// Pings on a jittered interval and force-closes the transport once the
/// grace period runs out.
async fn run_heartbeat(inner: Arc<Inner>, session: u64) {
    let health = inner.config.health;
    let mut wait = health.next_wait();

    loop {
        sleep(wait).await;

        let (action, missed) = {
            let mut shared = inner.shared.lock();
            if shared.session != session {
                return;
            }
            if shared.state != ConnectionState::Ready {
                wait = health.next_wait();
                continue;
            }
            let action = shared.health.on_heartbeat(Instant::now(), &health);
            match action {
                HeartbeatAction::Ping | HeartbeatAction::GracePing => inner.send_ping(&shared),
                HeartbeatAction::ForceClose => inner.close_transport(&mut shared),
            }
            (action, shared.health.missed_pongs)
        };

        match action {
            HeartbeatAction::Ping => wait = health.next_wait(),
            HeartbeatAction::GracePing => {
                warn!(missed, grace = ?health.grace_period, "Pongs missing, grace period running");
                wait = health.grace_period;
            }
            HeartbeatAction::ForceClose => {
                error!(missed, "No pong within grace period, forcing reconnect");
                return;
            }
        }
    }
}


#[cfg(test)]
mod mock_server_tests {
    //! Tests against a mock Deriv WebSocket server.
    //!
    //! The server answers every JSON request through a responder closure and
    //! records what it received, so tests can assert on the exact requests
    //! the client sent (authorize tokens, buy payloads, subscriptions).

    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    type Responder = Arc<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

    const DEMO_TOKEN: &str = "demoToken0000000001";
    const REAL_TOKEN: &str = "realToken0000000001";
    const BAD_TOKEN: &str = "badToken00000000001";

    /// Mock Deriv server accepting any number of connections.
    struct MockDerivServer {
        addr: SocketAddr,
        received: Arc<Mutex<Vec<Value>>>,
        connections: Arc<AtomicUsize>,
        shutdown_tx: Option<oneshot::Sender<()>>,
    }

    impl MockDerivServer {
        async fn start(responder: Responder) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
            let received = Arc::new(Mutex::new(Vec::new()));
            let connections = Arc::new(AtomicUsize::new(0));

            let log = Arc::clone(&received);
            let count = Arc::clone(&connections);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => return,
                        accepted = listener.accept() => {
                            let Ok((stream, _)) = accepted else { return };
                            count.fetch_add(1, Ordering::SeqCst);
                            let responder = Arc::clone(&responder);
                            let log = Arc::clone(&log);
                            tokio::spawn(async move {
                                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                                    return;
                                };
                                let (mut write, mut read) = ws.split();
                                while let Some(Ok(Message::Text(text))) = read.next().await {
                                    let Ok(request) = serde_json::from_str::<Value>(&text) else {
                                        continue;
                                    };
                                    log.lock().push(request.clone());
                                    for reply in responder(&request) {
                                        if write.send(Message::Text(reply.to_string())).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                            });
                        }
                    }
                }
            });

            Self {
                addr,
                received,
                connections,
                shutdown_tx: Some(shutdown_tx),
            }
        }

        fn url(&self) -> String {
            format!("ws://{}", self.addr)
        }

        fn received(&self) -> Vec<Value> {
            self.received.lock().clone()
        }

        fn authorize_tokens(&self) -> Vec<String> {
            self.received()
                .iter()
                .filter_map(|r| r.get("authorize").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        }

        fn connections(&self) -> usize {
            self.connections.load(Ordering::SeqCst)
        }
    }

    impl Drop for MockDerivServer {
        fn drop(&mut self) {
            if let Some(tx) = self.shutdown_tx.take() {
                let _ = tx.send(());
            }
        }
    }

    /// Answers like a healthy Deriv endpoint. Tokens starting with `bad` are rejected.
    fn deriv_like(request: &Value) -> Vec<Value> {
        let req_id = request.get("req_id").cloned().unwrap_or(Value::Null);

        if let Some(token) = request.get("authorize").and_then(Value::as_str) {
            if token.starts_with("bad") {
                return vec![json!({
                    "msg_type": "authorize", "req_id": req_id,
                    "error": {"code": "InvalidToken", "message": "The token is invalid."}
                })];
            }
            let demo = token.starts_with("demo");
            return vec![json!({
                "msg_type": "authorize", "req_id": req_id,
                "authorize": {
                    "loginid": if demo { "VRTC1001" } else { "CR2002" },
                    "balance": 1000,
                    "currency": "USD",
                    "is_virtual": u8::from(demo)
                }
            })];
        }
        if request.get("ping").is_some() {
            return vec![json!({"msg_type": "ping", "ping": "pong"})];
        }
        if request.get("balance").is_some() {
            return vec![json!({
                "msg_type": "balance", "req_id": req_id,
                "balance": {"balance": 1000, "currency": "USD"}
            })];
        }
        if let Some(symbol) = request.get("ticks").and_then(Value::as_str) {
            return vec![json!({
                "msg_type": "tick", "req_id": req_id,
                "subscription": {"id": "tick-sub-1"},
                "tick": {"symbol": symbol, "quote": 2001.25, "epoch": 1_700_000_000}
            })];
        }
        if request.get("buy").is_some() {
            return vec![json!({
                "msg_type": "buy", "req_id": req_id,
                "buy": {"contract_id": 555, "buy_price": request["price"].clone()}
            })];
        }
        Vec::new()
    }

    fn fast_config(url: String) -> ClientConfig {
        ClientConfig {
            url,
            initial_account: AccountType::Demo,
            connect_timeout: Duration::from_secs(2),
            auth_timeout: Duration::from_secs(2),
            auth_retry: RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(40), 3),
            reconnect: RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(40), 3),
            health: HealthConfig {
                interval: Duration::from_secs(60),
                jitter: Duration::ZERO,
                max_missed_pongs: 3,
                grace_period: Duration::from_secs(10),
            },
            probe_timeout: Duration::from_secs(1),
        }
    }

    fn both_credentials(real: &str) -> Credentials {
        Credentials::new(Some(DEMO_TOKEN.to_string()), Some(real.to_string()))
    }

    /// Probe that reports the network down for the first `down_for` calls.
    struct ScriptedProbe {
        calls: AtomicUsize,
        down_for: usize,
    }

    impl ScriptedProbe {
        fn up() -> Arc<Self> {
            Self::down_for(0)
        }

        fn down_for(down_for: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                down_for,
            })
        }
    }

    #[async_trait]
    impl NetworkProbe for ScriptedProbe {
        async fn is_reachable(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) >= self.down_for
        }
    }

    /// Accepts TCP connections and drops them before the WebSocket handshake.
    async fn refusing_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                count.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        });
        (format!("ws://{addr}"), accepted)
    }

    async fn wait_for_state(client: &DerivClient, target: ConnectionState) -> bool {
        let mut rx = client.state_changes();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == target))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    async fn next_matching<F>(rx: &mut mpsc::UnboundedReceiver<ClientEvent>, mut pred: F) -> ClientEvent
    where
        F: FnMut(&ClientEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                if pred(&event) {
                    return event;
                }
            }
            panic!("event channel closed");
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn test_connect_authorize_and_subscribe_balance() {
        let server = MockDerivServer::start(Arc::new(deriv_like)).await;
        let (client, mut rx) = DerivClient::with_probe(
            fast_config(server.url()),
            both_credentials(REAL_TOKEN),
            ScriptedProbe::up(),
        );

        client.connect();
        assert!(client.wait_until_ready(Duration::from_secs(5)).await);

        let account = client.account().unwrap();
        assert_eq!(account.account_id, "VRTC1001");
        assert_eq!(account.account_type, AccountType::Demo);
        assert!(account.is_virtual);
        assert_eq!(OrderGateway::balance(&client), Some(Decimal::from(1000)));

        let mut seen = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            if let ClientEvent::ConnectionStateChanged { to, .. } = event {
                seen.push(to);
            }
        }
        assert_eq!(
            seen,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Authorizing,
                ConnectionState::Ready,
            ]
        );
        assert!(server.received().iter().any(|r| r.get("balance").is_some()));
    }

    #[tokio::test]
    async fn test_invalid_real_token_falls_back_to_demo_without_retry() {
        let server = MockDerivServer::start(Arc::new(deriv_like)).await;
        let config = ClientConfig {
            initial_account: AccountType::Real,
            ..fast_config(server.url())
        };
        let (client, _rx) =
            DerivClient::with_probe(config, both_credentials(BAD_TOKEN), ScriptedProbe::up());

        client.connect();
        assert!(client.wait_until_ready(Duration::from_secs(5)).await);

        assert_eq!(server.authorize_tokens(), vec![BAD_TOKEN, DEMO_TOKEN]);
        assert_eq!(client.account_type(), AccountType::Demo);
        assert_eq!(client.account().unwrap().account_id, "VRTC1001");
    }

    #[tokio::test]
    async fn test_invalid_token_without_demo_fails() {
        let server = MockDerivServer::start(Arc::new(deriv_like)).await;
        let config = ClientConfig {
            initial_account: AccountType::Real,
            ..fast_config(server.url())
        };
        let (client, _rx) = DerivClient::with_probe(
            config,
            Credentials::new(None, Some(BAD_TOKEN.to_string())),
            ScriptedProbe::up(),
        );

        client.connect();
        assert!(wait_for_state(&client, ConnectionState::Failed).await);
        assert_eq!(server.authorize_tokens(), vec![BAD_TOKEN]);
        assert!(client.last_auth_error().unwrap().contains("InvalidToken"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(server.connections(), 1);
    }

    #[tokio::test]
    async fn test_transient_auth_error_is_retried() {
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        let responder: Responder = Arc::new(move |request: &Value| {
            if request.get("authorize").is_some() && counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return vec![json!({
                    "msg_type": "authorize", "req_id": request["req_id"].clone(),
                    "error": {"code": "InternalServerError", "message": "try again"}
                })];
            }
            deriv_like(request)
        });
        let server = MockDerivServer::start(responder).await;
        let (client, _rx) = DerivClient::with_probe(
            fast_config(server.url()),
            both_credentials(REAL_TOKEN),
            ScriptedProbe::up(),
        );

        client.connect();
        assert!(client.wait_until_ready(Duration::from_secs(5)).await);
        assert_eq!(server.authorize_tokens(), vec![DEMO_TOKEN, DEMO_TOKEN]);
        assert_eq!(client.last_auth_error(), None);
    }

    fn authorize_error(request: &Value, code: &str) -> Vec<Value> {
        vec![json!({
            "msg_type": "authorize", "req_id": request["req_id"].clone(),
            "error": {"code": code, "message": "try again"}
        })]
    }

    #[tokio::test]
    async fn test_real_auth_retries_exhausted_then_demo() {
        let responder: Responder = Arc::new(|request: &Value| {
            if request.get("authorize").and_then(Value::as_str) == Some(REAL_TOKEN) {
                return authorize_error(request, "InternalServerError");
            }
            deriv_like(request)
        });
        let server = MockDerivServer::start(responder).await;
        let config = ClientConfig {
            initial_account: AccountType::Real,
            ..fast_config(server.url())
        };
        let (client, _rx) =
            DerivClient::with_probe(config, both_credentials(REAL_TOKEN), ScriptedProbe::up());

        client.connect();
        assert!(client.wait_until_ready(Duration::from_secs(5)).await);
        assert_eq!(
            server.authorize_tokens(),
            vec![REAL_TOKEN, REAL_TOKEN, REAL_TOKEN, DEMO_TOKEN]
        );
        assert_eq!(client.account_type(), AccountType::Demo);
        assert_eq!(client.account().unwrap().account_id, "VRTC1001");
    }

    #[tokio::test]
    async fn test_demo_auth_retries_exhausted_then_failed() {
        let responder: Responder = Arc::new(|request: &Value| {
            if request.get("authorize").is_some() {
                return authorize_error(request, "InternalServerError");
            }
            deriv_like(request)
        });
        let server = MockDerivServer::start(responder).await;
        let (client, _rx) = DerivClient::with_probe(
            fast_config(server.url()),
            Credentials::new(Some(DEMO_TOKEN.to_string()), None),
            ScriptedProbe::up(),
        );

        client.connect();
        assert!(wait_for_state(&client, ConnectionState::Failed).await);
        assert_eq!(server.authorize_tokens(), vec![DEMO_TOKEN, DEMO_TOKEN, DEMO_TOKEN]);
        assert!(client
            .last_auth_error()
            .unwrap()
            .contains("InternalServerError"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(server.connections(), 1);
        assert_eq!(server.authorize_tokens().len(), 3);
    }

    #[tokio::test]
    async fn test_unanswered_authorize_times_out_and_retries() {
        let answered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&answered);
        let responder: Responder = Arc::new(move |request: &Value| {
            if request.get("authorize").is_some() && counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Vec::new();
            }
            deriv_like(request)
        });
        let server = MockDerivServer::start(responder).await;
        let config = ClientConfig {
            auth_timeout: Duration::from_millis(100),
            ..fast_config(server.url())
        };
        let (client, _rx) =
            DerivClient::with_probe(config, both_credentials(REAL_TOKEN), ScriptedProbe::up());

        client.connect();
        assert!(client.wait_until_ready(Duration::from_secs(5)).await);
        assert_eq!(server.authorize_tokens(), vec![DEMO_TOKEN, DEMO_TOKEN]);
        assert_eq!(client.account().unwrap().account_id, "VRTC1001");
        assert_eq!(server.connections(), 1);
    }

    #[tokio::test]
    async fn test_stale_authorize_replies_after_switch_are_ignored() {
        // The demo authorize is held back and answered only once the real
        // authorize arrives: a late success and a late InvalidToken for the
        // old request, then the genuine real reply.
        let held: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&held);
        let responder: Responder = Arc::new(move |request: &Value| {
            match request.get("authorize").and_then(Value::as_str) {
                Some(DEMO_TOKEN) => {
                    *slot.lock() = Some(request["req_id"].clone());
                    Vec::new()
                }
                Some(REAL_TOKEN) => {
                    let stale_id = slot.lock().clone().unwrap_or(Value::Null);
                    let mut replies = vec![
                        json!({
                            "msg_type": "authorize", "req_id": stale_id,
                            "authorize": {
                                "loginid": "VRTC1001", "balance": 1000,
                                "currency": "USD", "is_virtual": 1
                            }
                        }),
                        json!({
                            "msg_type": "authorize", "req_id": stale_id,
                            "error": {"code": "InvalidToken", "message": "The token is invalid."}
                        }),
                    ];
                    replies.extend(deriv_like(request));
                    replies
                }
                _ => deriv_like(request),
            }
        });
        let server = MockDerivServer::start(responder).await;
        let config = ClientConfig {
            auth_timeout: Duration::from_secs(10),
            ..fast_config(server.url())
        };
        let (client, _rx) =
            DerivClient::with_probe(config, both_credentials(REAL_TOKEN), ScriptedProbe::up());

        client.connect();
        let sent = tokio::time::timeout(Duration::from_secs(5), async {
            while server.authorize_tokens().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(sent.is_ok());
        assert_eq!(client.connection_state(), ConnectionState::Authorizing);

        assert!(client.switch_account(AccountType::Real));
        assert!(client.wait_until_ready(Duration::from_secs(5)).await);

        let account = client.account().unwrap();
        assert_eq!(account.account_type, AccountType::Real);
        assert_eq!(account.account_id, "CR2002");
        assert!(!account.is_virtual);
        assert_eq!(client.last_auth_error(), None);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.authorize_tokens(), vec![DEMO_TOKEN, REAL_TOKEN]);
        assert_eq!(client.account_type(), AccountType::Real);
        assert!(client.is_ready());
    }

    #[tokio::test]
    async fn test_heartbeat_waits_for_ready() {
        let responder: Responder = Arc::new(|request: &Value| {
            if request.get("authorize").is_some() {
                return Vec::new();
            }
            deriv_like(request)
        });
        let server = MockDerivServer::start(responder).await;
        let config = ClientConfig {
            auth_timeout: Duration::from_secs(10),
            health: HealthConfig {
                interval: Duration::from_millis(20),
                jitter: Duration::ZERO,
                max_missed_pongs: 2,
                grace_period: Duration::from_millis(20),
            },
            ..fast_config(server.url())
        };
        let (client, _rx) =
            DerivClient::with_probe(config, both_credentials(REAL_TOKEN), ScriptedProbe::up());

        client.connect();
        assert!(wait_for_state(&client, ConnectionState::Authorizing).await);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(client.connection_state(), ConnectionState::Authorizing);
        assert_eq!(server.connections(), 1);
        assert!(!server.received().iter().any(|r| r.get("ping").is_some()));
        client.disconnect();
    }

    #[tokio::test]
    async fn test_ticks_and_buy_ack_are_delivered() {
        let server = MockDerivServer::start(Arc::new(deriv_like)).await;
        let (client, mut rx) = DerivClient::with_probe(
            fast_config(server.url()),
            both_credentials(REAL_TOKEN),
            ScriptedProbe::up(),
        );
        client.connect();
        assert!(client.wait_until_ready(Duration::from_secs(5)).await);

        assert!(client.subscribe_ticks("R_100"));
        let tick = next_matching(&mut rx, |e| matches!(e, ClientEvent::Tick(_))).await;
        match tick {
            ClientEvent::Tick(tick) => {
                assert_eq!(tick.symbol, "R_100");
                assert_eq!(tick.quote.to_string(), "2001.25");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(client.tick_subscription().as_deref(), Some("tick-sub-1"));

        let order = OrderRequest {
            symbol: "R_100".to_string(),
            contract_type: deriv_bot_core::ContractType::Put,
            stake: Decimal::new(50, 2),
            duration: 5,
            duration_unit: deriv_bot_core::DurationUnit::Ticks,
            currency: "USD".to_string(),
        };
        let req_id = client.buy(&order).unwrap();
        let ack = next_matching(&mut rx, |e| matches!(e, ClientEvent::OrderAck(_))).await;
        assert_eq!(
            ack,
            ClientEvent::OrderAck(OrderAck::Accepted {
                req_id,
                contract_id: 555,
                buy_price: Decimal::new(5, 1),
            })
        );

        // buy subscribes on its own, so no extra request goes out
        assert!(client.subscribe_contract(555));
        let buy = server
            .received()
            .into_iter()
            .find(|r| r.get("buy").is_some())
            .unwrap();
        assert_eq!(buy["parameters"]["contract_type"], "PUT");
        assert!(!server
            .received()
            .iter()
            .any(|r| r.get("proposal_open_contract").is_some()));
    }

    #[tokio::test]
    async fn test_switch_account_reauthorizes() {
        let server = MockDerivServer::start(Arc::new(deriv_like)).await;
        let (client, _rx) = DerivClient::with_probe(
            fast_config(server.url()),
            both_credentials(REAL_TOKEN),
            ScriptedProbe::up(),
        );
        client.connect();
        assert!(client.wait_until_ready(Duration::from_secs(5)).await);
        assert!(client.subscribe_ticks("R_100"));

        assert!(client.switch_account(AccountType::Real));
        let switched = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if client.account().map(|a| a.account_id) == Some("CR2002".to_string()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(switched.is_ok());
        assert!(client.is_ready());
        assert_eq!(server.authorize_tokens(), vec![DEMO_TOKEN, REAL_TOKEN]);
        assert!(client.inner.shared.lock().tick_symbol.is_none());

        assert!(client.switch_account(AccountType::Real));
        assert_eq!(server.connections(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_budget_exhausted_then_failed() {
        let (url, accepted) = refusing_server().await;
        let (client, _rx) =
            DerivClient::with_probe(fast_config(url), both_credentials(REAL_TOKEN), ScriptedProbe::up());

        client.connect();
        assert!(wait_for_state(&client, ConnectionState::Failed).await);
        // initial attempt plus three charged reconnects
        assert_eq!(accepted.load(Ordering::SeqCst), 4);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 4);
        assert_eq!(client.connection_state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_unreachable_network_does_not_use_attempts() {
        let (url, accepted) = refusing_server().await;
        let config = ClientConfig {
            reconnect: RetryPolicy::new(Duration::from_millis(5), Duration::from_millis(20), 2),
            ..fast_config(url)
        };
        let probe = ScriptedProbe::down_for(3);
        let (client, _rx) = DerivClient::with_probe(
            config,
            both_credentials(REAL_TOKEN),
            Arc::clone(&probe) as Arc<dyn NetworkProbe>,
        );

        client.connect();
        assert!(wait_for_state(&client, ConnectionState::Failed).await);
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_silent_server_triggers_reconnect() {
        let responder: Responder = Arc::new(|request: &Value| {
            if request.get("ping").is_some() {
                return Vec::new();
            }
            deriv_like(request)
        });
        let server = MockDerivServer::start(responder).await;
        let config = ClientConfig {
            health: HealthConfig {
                interval: Duration::from_millis(20),
                jitter: Duration::ZERO,
                max_missed_pongs: 2,
                grace_period: Duration::from_millis(20),
            },
            ..fast_config(server.url())
        };
        let (client, mut rx) =
            DerivClient::with_probe(config, both_credentials(REAL_TOKEN), ScriptedProbe::up());

        client.connect();
        assert!(client.wait_until_ready(Duration::from_secs(5)).await);

        next_matching(&mut rx, |e| {
            matches!(
                e,
                ClientEvent::ConnectionStateChanged {
                    to: ConnectionState::Reconnecting,
                    ..
                }
            )
        })
        .await;
        next_matching(&mut rx, |e| {
            matches!(
                e,
                ClientEvent::ConnectionStateChanged {
                    to: ConnectionState::Ready,
                    ..
                }
            )
        })
        .await;
        assert!(server.connections() >= 2);
        client.disconnect();
    }

    #[tokio::test]
    async fn test_answered_pings_keep_connection() {
        let server = MockDerivServer::start(Arc::new(deriv_like)).await;
        let config = ClientConfig {
            health: HealthConfig {
                interval: Duration::from_millis(20),
                jitter: Duration::ZERO,
                max_missed_pongs: 2,
                grace_period: Duration::from_millis(20),
            },
            ..fast_config(server.url())
        };
        let (client, _rx) =
            DerivClient::with_probe(config, both_credentials(REAL_TOKEN), ScriptedProbe::up());

        client.connect();
        assert!(client.wait_until_ready(Duration::from_secs(5)).await);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(client.is_ready());
        assert_eq!(server.connections(), 1);
        let pings = server.received().iter().filter(|r| r.get("ping").is_some()).count();
        assert!(pings >= 3, "expected regular pings, saw {pings}");
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let server = MockDerivServer::start(Arc::new(deriv_like)).await;
        let (client, mut rx) = DerivClient::with_probe(
            fast_config(server.url()),
            both_credentials(REAL_TOKEN),
            ScriptedProbe::up(),
        );
        client.connect();
        assert!(client.wait_until_ready(Duration::from_secs(5)).await);

        client.disconnect();
        client.disconnect();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(!client.subscribe_ticks("R_100"));

        let mut disconnects = 0;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
            if matches!(
                event,
                ClientEvent::ConnectionStateChanged {
                    to: ConnectionState::Disconnected,
                    ..
                }
            ) {
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);

        // a fresh connect works after disconnect
        client.connect();
        assert!(client.wait_until_ready(Duration::from_secs(5)).await);
        assert_eq!(server.connections(), 2);
    }
}
