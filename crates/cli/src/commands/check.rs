//! Configuration and connectivity check.

use anyhow::Result;
use clap::Args;
use deriv_bot_core::{AccountType, AppConfig};
use deriv_bot_exchange::{validate_endpoint, NetworkProbe, TcpProbe};
use std::time::Duration;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Also connect and authorize.
    #[arg(long)]
    pub connect: bool,

    /// Seconds to wait for authorization when connecting.
    #[arg(long, default_value = "30")]
    pub connect_timeout: u64,
}

pub async fn run_check(config: AppConfig, args: CheckArgs) -> Result<()> {
    let broker = &config.broker;
    let credentials = broker.credentials();
    let mut failures = 0;

    println!("Endpoint: {}", broker.url());
    match validate_endpoint(&broker.url()) {
        Ok(_) => println!("  ✓ endpoint url is valid"),
        Err(e) => {
            failures += 1;
            println!("  ✗ {e}");
        }
    }

    for account in [AccountType::Demo, AccountType::Real] {
        match credentials.preview(account) {
            Some(preview) => println!("  ✓ {account} token: {preview}"),
            None => println!("  - {account} token: not configured"),
        }
    }
    if !credentials.has(broker.initial_account) {
        println!(
            "  ! initial account {} has no token, the other account will be used",
            broker.initial_account
        );
    }

    match TcpProbe::for_endpoint(
        &broker.url(),
        Duration::from_secs(broker.probe_timeout_secs),
    ) {
        Ok(probe) => {
            let (host, port) = probe.target();
            if probe.is_reachable().await {
                println!("  ✓ {host}:{port} reachable");
            } else {
                failures += 1;
                println!("  ✗ {host}:{port} unreachable");
            }
        }
        Err(e) => {
            failures += 1;
            println!("  ✗ network probe unavailable: {e}");
        }
    }

    let trade = config.trading.trade_config();
    println!(
        "Trading: {} stake {} duration {}{} target {}",
        trade.symbol, trade.base_stake, trade.duration, trade.duration_unit, trade.target_trades
    );
    println!(
        "Risk: max loss {}% | daily loss {} | {} consecutive losses | martingale x{} up to level {}",
        config.risk.max_loss_fraction * rust_decimal::Decimal::ONE_HUNDRED,
        config.risk.max_daily_loss,
        config.risk.max_consecutive_losses,
        config.martingale.base_multiplier,
        config.martingale.max_level
    );

    if args.connect {
        match super::connect(broker, None, Duration::from_secs(args.connect_timeout)).await {
            Ok((client, _events)) => {
                if let Some(account) = client.account() {
                    println!(
                        "  ✓ authorized {} ({}) balance {:.2} {}",
                        account.account_id,
                        account.account_type,
                        account.balance,
                        account.currency
                    );
                }
                client.disconnect();
            }
            Err(e) => {
                failures += 1;
                println!("  ✗ {e}");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} check(s) failed");
    }
    println!("All checks passed");
    Ok(())
}
