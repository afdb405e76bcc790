use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crosslend::{LendingConfig, Protocol, TermMode};
use std::path::PathBuf;
use tracing::info;

mod replay;

#[derive(Parser, Debug)]
#[command(name = "crosslend")]
#[command(about = "cross-chain lending pool ledger", long_about = None)]
struct Cli {
    /// toml config file
    #[arg(long, env = "CROSSLEND_CONFIG")]
    config: Option<PathBuf>,

    /// loan terms in minutes instead of months
    #[arg(long, env = "CROSSLEND_ACCELERATED_TERM")]
    accelerated_term: bool,

    /// coingecko demo api key
    #[arg(long, env = "COINGECKO_API_KEY")]
    coingecko_api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// print protocol constants and the effective config
    Info,
    /// fetch current usd prices through the cache
    Prices,
    /// run a scripted sequence of deposits, loans and queries
    Replay {
        /// script file (toml)
        script: PathBuf,
    },
}

fn load_config(cli: &Cli) -> Result<LendingConfig> {
    let mut config = match &cli.config {
        Some(path) => LendingConfig::load(path)?,
        None => LendingConfig::default(),
    };
    if cli.accelerated_term {
        config.loans.term = TermMode::Accelerated;
    }
    if let Some(key) = &cli.coingecko_api_key {
        config.prices.coingecko_api_key = Some(key.clone());
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crosslend=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    info!("loan term mode: {:?}", config.loans.term);

    match cli.command {
        Command::Info => {
            let info = serde_json::json!({
                "borrow_apy": crosslend::BORROW_APY,
                "lend_apy": crosslend::LEND_APY,
                "loan_term_months": crosslend::LOAN_TERM_MONTHS,
                "accelerated_term_minutes": crosslend::ACCELERATED_TERM_MINUTES,
                "collateral_ratio": crosslend::COLLATERAL_RATIO,
                "config": config,
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Prices => {
            let protocol = Protocol::builder(config).build()?;
            let prices = protocol.prices().await;
            println!("{}", serde_json::to_string_pretty(&prices)?);
        }
        Command::Replay { script } => {
            let raw = std::fs::read_to_string(&script)
                .with_context(|| format!("reading {}", script.display()))?;
            let script = replay::Script::parse(&raw)?;
            replay::run(config, script).await?;
        }
    }

    Ok(())
}
