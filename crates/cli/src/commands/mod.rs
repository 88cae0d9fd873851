//! CLI commands for the Deriv trading bot.

pub mod check;
pub mod contracts;
pub mod run;

pub use check::{run_check, CheckArgs};
pub use contracts::{run_contracts, ContractsArgs};
pub use run::{run_session, RunArgs};

use anyhow::{bail, Result};
use deriv_bot_core::{AccountType, BrokerConfig, ClientEvent};
use deriv_bot_exchange::{ClientConfig, DerivClient};
use std::time::Duration;
use tokio::sync::mpsc;

/// Connects with the configured credentials and waits for authorization.
pub(crate) async fn connect(
    broker: &BrokerConfig,
    account: Option<AccountType>,
    timeout: Duration,
) -> Result<(DerivClient, mpsc::UnboundedReceiver<ClientEvent>)> {
    let mut broker = broker.clone();
    if let Some(account) = account {
        broker.initial_account = account;
    }

    let credentials = broker.credentials();
    if !credentials.has(AccountType::Demo) && !credentials.has(AccountType::Real) {
        bail!("no API token configured (set DERIV_TOKEN_DEMO or DERIV_TOKEN_REAL)");
    }

    let (client, events) = DerivClient::new(ClientConfig::from_broker(&broker), credentials);
    client.connect();
    if !client.wait_until_ready(timeout).await {
        let reason = client
            .last_auth_error()
            .unwrap_or_else(|| client.connection_state().to_string());
        client.disconnect();
        bail!("could not connect to Deriv: {reason}");
    }
    Ok((client, events))
}
