use anyhow::Result;
use clap::{Parser, Subcommand};
use deriv_bot_core::ConfigLoader;
use std::path::PathBuf;

mod commands;
mod notifier;

use commands::{CheckArgs, ContractsArgs, RunArgs};

#[derive(Parser)]
#[command(name = "deriv-bot")]
#[command(about = "Automated binary-option trading on Deriv", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = "config/Config.toml")]
    config: PathBuf,

    /// Profile overlay (loads Config.<profile>.toml next to the config file)
    #[arg(short, long, global = true, env = "DERIV_BOT_PROFILE")]
    profile: Option<String>,

    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an automated trading session
    Run(RunArgs),
    /// Validate configuration, tokens and connectivity
    Check(CheckArgs),
    /// List contracts offered for a symbol
    Contracts(ContractsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    let config = ConfigLoader::load_from(&cli.config, cli.profile.as_deref())?;

    match cli.command {
        Commands::Run(args) => commands::run_session(config, args).await?,
        Commands::Check(args) => commands::run_check(config, args).await?,
        Commands::Contracts(args) => commands::run_contracts(config, args).await?,
    }

    Ok(())
}
