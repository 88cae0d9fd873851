//! Lists the contracts the broker offers for a symbol.

use anyhow::{bail, Result};
use clap::Args;
use deriv_bot_core::{AppConfig, ClientEvent};
use std::time::Duration;

#[derive(Args, Debug)]
pub struct ContractsArgs {
    /// Symbol to query; defaults to the configured one.
    #[arg(long)]
    pub symbol: Option<String>,

    /// Seconds to wait for the answer.
    #[arg(long, default_value = "30")]
    pub timeout: u64,
}

pub async fn run_contracts(config: AppConfig, args: ContractsArgs) -> Result<()> {
    let symbol = args.symbol.unwrap_or_else(|| config.trading.symbol.clone());
    let timeout = Duration::from_secs(args.timeout);
    let (client, mut events) = super::connect(&config.broker, None, timeout).await?;

    if !client.contracts_for(&symbol) {
        client.disconnect();
        bail!("contracts_for request could not be sent");
    }

    let answer = tokio::time::timeout(timeout, async {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::ContractsFor { contracts, .. } => return Ok(contracts),
                ClientEvent::BrokerError { code, message } => {
                    return Err(anyhow::anyhow!("{code}: {message}"))
                }
                _ => {}
            }
        }
        Err(anyhow::anyhow!("connection closed"))
    })
    .await;
    client.disconnect();

    let contracts = match answer {
        Ok(result) => result?,
        Err(_) => bail!("no answer within {}s", args.timeout),
    };

    println!("Contracts for {symbol}:");
    for contract in &contracts {
        println!(
            "  {:<12} {:>6} .. {:<6}",
            contract.contract_type,
            contract.min_duration.as_deref().unwrap_or("-"),
            contract.max_duration.as_deref().unwrap_or("-")
        );
    }
    println!("{} offering(s)", contracts.len());
    Ok(())
}
