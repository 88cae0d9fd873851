//! Runs an automated trading session until the target, a risk stop or Ctrl-C.

use anyhow::{bail, Context, Result};
use clap::Args;
use deriv_bot_core::{AccountType, AppConfig, TradeSessionState};
use deriv_bot_data::open_journal;
use deriv_bot_execution::{SessionRunner, TradingEngine};
use deriv_bot_signals::IndicatorEngine;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::notifier::ConsoleNotifier;

/// Arguments for the run command. Unset values come from the configuration.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Symbol to trade (e.g. frxXAUUSD, R_100).
    #[arg(long)]
    pub symbol: Option<String>,

    /// Base stake per trade.
    #[arg(long)]
    pub stake: Option<Decimal>,

    /// Contract duration such as 5t, 30s or 1m.
    #[arg(long)]
    pub duration: Option<String>,

    /// Number of trades after which the session ends (0 = unlimited).
    #[arg(long)]
    pub trades: Option<u32>,

    /// Account to start on (demo or real).
    #[arg(long)]
    pub account: Option<AccountType>,

    /// Seconds to wait for the connection to authorize.
    #[arg(long, default_value = "30")]
    pub connect_timeout: u64,

    /// Seconds between status reports (0 disables them).
    #[arg(long, default_value = "60")]
    pub status_every: u64,
}

pub async fn run_session(config: AppConfig, args: RunArgs) -> Result<()> {
    let mut trading = config.trading.clone();
    if let Some(symbol) = args.symbol {
        trading.symbol = symbol;
    }
    if let Some(stake) = args.stake {
        trading.stake = stake;
    }
    if let Some(duration) = args.duration {
        trading.duration = duration;
    }
    if let Some(trades) = args.trades {
        trading.target_trades = trades;
    }

    let (client, events) = super::connect(
        &config.broker,
        args.account,
        Duration::from_secs(args.connect_timeout),
    )
    .await?;
    if let Some(account) = client.account() {
        println!(
            "Connected to {} account {} | balance {:.2} {}",
            account.account_type, account.account_id, account.balance, account.currency
        );
    }

    let journal = open_journal(&config.journal).context("failed to open trade journal")?;
    let engine = TradingEngine::new(
        Arc::new(client.clone()),
        Box::new(IndicatorEngine::default()),
        Arc::new(ConsoleNotifier),
        &config.risk,
        config.martingale.clone(),
    )
    .with_journal(journal);

    let (runner, handle) = SessionRunner::new(engine, events, Duration::from_millis(500));
    let runner_task = tokio::spawn(runner.run());

    match handle.configure(trading.trade_config()).await? {
        Ok(message) => println!("{message}"),
        Err(e) => bail!("configuration refused: {e}"),
    }
    match handle.start().await? {
        Ok(message) => println!("{message}"),
        Err(e) => {
            handle.shutdown().await.ok();
            client.disconnect();
            bail!("session not started: {e}");
        }
    }

    let mut states = handle.state_changes();
    let mut status_timer =
        tokio::time::interval(Duration::from_secs(args.status_every.max(1)));
    status_timer.tick().await;

    loop {
        if *states.borrow_and_update() == TradeSessionState::Stopped {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, stopping session");
                if let Err(e) = handle.stop().await? {
                    println!("{e}");
                }
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = status_timer.tick(), if args.status_every > 0 => {
                println!("\n{}\n", handle.status().await?);
            }
        }
    }

    handle.shutdown().await.ok();
    let engine = runner_task.await.context("session runner panicked")?;
    client.disconnect();
    info!(trades = engine.stats().total_trades, "Run finished");
    Ok(())
}
