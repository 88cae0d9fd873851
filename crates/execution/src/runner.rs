//! Single-consumer session actor.
//!
//! Owns the [`TradingEngine`] and serialises everything that touches it:
//! broker events from the client queue, operator commands from
//! [`SessionHandle`]s and the periodic deadline poll.

use crate::engine::TradingEngine;
use crate::error::ExecutionError;
use anyhow::Result;
use deriv_bot_core::{ClientEvent, SessionSummary, TradeConfig, TradeSessionState};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum SessionCommand {
    Configure(TradeConfig, oneshot::Sender<Result<String, ExecutionError>>),
    Start(oneshot::Sender<Result<String, ExecutionError>>),
    Stop(oneshot::Sender<Result<SessionSummary, ExecutionError>>),
    Status(oneshot::Sender<String>),
    Shutdown,
}

#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<TradeSessionState>,
}

impl SessionHandle {
    /// # Errors
    /// Returns an error if the runner is gone. A refused configuration is
    /// the inner `Err`.
    pub async fn configure(&self, config: TradeConfig) -> Result<Result<String, ExecutionError>> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::Configure(config, tx)).await?;
        Ok(rx.await?)
    }

    /// # Errors
    /// Returns an error if the runner is gone.
    pub async fn start(&self) -> Result<Result<String, ExecutionError>> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::Start(tx)).await?;
        Ok(rx.await?)
    }

    /// # Errors
    /// Returns an error if the runner is gone.
    pub async fn stop(&self) -> Result<Result<SessionSummary, ExecutionError>> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::Stop(tx)).await?;
        Ok(rx.await?)
    }

    /// # Errors
    /// Returns an error if the runner is gone.
    pub async fn status(&self) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::Status(tx)).await?;
        Ok(rx.await?)
    }

    /// # Errors
    /// Returns an error if the runner already exited.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(SessionCommand::Shutdown).await?;
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> TradeSessionState {
        *self.state.borrow()
    }

    /// Watch channel following the engine's session state.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<TradeSessionState> {
        self.state.clone()
    }
}

pub struct SessionRunner {
    engine: TradingEngine,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    commands: mpsc::Receiver<SessionCommand>,
    state_tx: watch::Sender<TradeSessionState>,
    poll_interval: Duration,
}

impl SessionRunner {
    pub fn new(
        engine: TradingEngine,
        events: mpsc::UnboundedReceiver<ClientEvent>,
        poll_interval: Duration,
    ) -> (Self, SessionHandle) {
        let (tx, commands) = mpsc::channel(32);
        let (state_tx, state) = watch::channel(engine.state());
        let runner = Self {
            engine,
            events,
            commands,
            state_tx,
            poll_interval,
        };
        (runner, SessionHandle { tx, state })
    }

    /// Runs until shutdown or until the client event queue closes, then
    /// hands the engine back.
    pub async fn run(mut self) -> TradingEngine {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        warn!("Client event queue closed");
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => {
                        info!("Session runner shutting down");
                        break;
                    }
                    Some(command) => self.handle_command(command),
                },
                _ = ticker.tick() => self.engine.poll(Instant::now()),
            }
            self.publish_state();
        }

        if self.engine.is_active() {
            let _ = self.engine.stop();
            self.publish_state();
        }
        self.engine
    }

    fn dispatch(&mut self, event: ClientEvent) {
        let now = Instant::now();
        match event {
            ClientEvent::Tick(tick) => {
                if tick.symbol == self.engine.config().symbol {
                    self.engine.on_tick(tick.quote, now);
                } else {
                    debug!(symbol = %tick.symbol, "Tick for other symbol ignored");
                }
            }
            ClientEvent::OrderAck(ack) => self.engine.on_order_ack(ack, now),
            ClientEvent::Contract(update) => self.engine.on_contract_update(update, now),
            ClientEvent::Balance(balance) => self.engine.on_balance(balance.balance),
            ClientEvent::ConnectionStateChanged { from, to } => {
                debug!(%from, %to, "Connection state changed");
                self.engine.on_connection_state(to);
            }
            ClientEvent::BrokerError { code, message } => {
                self.engine.on_broker_error(&code, &message);
            }
            ClientEvent::ContractsFor { symbol, contracts } => {
                debug!(%symbol, count = contracts.len(), "Contract catalogue received");
            }
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Configure(config, reply) => {
                let _ = reply.send(self.engine.configure(config));
            }
            SessionCommand::Start(reply) => {
                let _ = reply.send(self.engine.start());
            }
            SessionCommand::Stop(reply) => {
                let _ = reply.send(self.engine.stop());
            }
            SessionCommand::Status(reply) => {
                let _ = reply.send(self.engine.status());
            }
            SessionCommand::Shutdown => {}
        }
    }

    fn publish_state(&self) {
        let state = self.engine.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}
