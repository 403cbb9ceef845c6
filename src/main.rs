//! Perpetuals Margin Account Liquidator
//!
//! Watches every margin account on a perpetuals exchange, keeps a fast
//! re-checked set of accounts near their margin limit, and liquidates the
//! ones the exchange program allows.
//! Features:
//! - Independently paced caches for exchange state, prices and accounts
//! - Full-population rescans that reseed the at-risk set
//! - One liquidation transaction per eligible account
//!
//! This binary runs against a chain snapshot file (dry run).

use std::sync::Arc;

use anyhow::{Context, Result};
use solana_sdk::signature::Signer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use perp_liquidator_chain::SnapshotChain;
use perp_liquidator_core::{BotConfig, Credentials, Liquidator, Orchestrator, OrchestratorConfig};

/// Environment variable names.
mod env {
    pub const CONFIG_FILE: &str = "CONFIG_FILE";
    pub const SNAPSHOT_PATH: &str = "SNAPSHOT_PATH";
}

#[tokio::main]
async fn main() -> Result<()> {
    // Print startup banner
    print_banner();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,perp_liquidator_core=debug,perp_liquidator_chain=debug")
            }),
        )
        .init();

    // BOT_PROFILE selects testing/production; CONFIG_FILE points at a TOML file
    let bot_config = load_bot_config()?;
    bot_config.log_config();

    info!("Starting margin account liquidator");

    let credentials = Credentials::from_env()?;
    info!(
        liquidator = %credentials.signer.pubkey(),
        liquidator_margin_account = %credentials.liquidator_margin_account,
        "Credentials loaded"
    );

    let snapshot_path = get_env(env::SNAPSHOT_PATH)?;
    let chain = Arc::new(SnapshotChain::from_file(&snapshot_path)?);
    let exchange_address = credentials.exchange.resolve(chain.as_ref());
    info!(
        exchange = %exchange_address,
        program_id = %chain.program_id(),
        "Exchange resolved"
    );

    let liquidator = Liquidator::new(
        chain.clone(),
        Arc::new(credentials.signer),
        credentials.liquidator_margin_account,
    );

    let mut orchestrator = Orchestrator::new(
        chain.clone(),
        chain,
        liquidator,
        exchange_address,
        OrchestratorConfig::from_bot_config(&bot_config),
    );

    // Runs until a refresh fails for good
    orchestrator.run().await
}

fn get_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("Missing env var: {}", name))
}

fn load_bot_config() -> Result<BotConfig> {
    match std::env::var(env::CONFIG_FILE) {
        Ok(path) => {
            let mut config = BotConfig::from_file(&path)?;
            config
                .apply_overrides(|name| std::env::var(name).ok())
                .context("invalid configuration override")?;
            Ok(config)
        }
        Err(_) => BotConfig::from_env(),
    }
}

/// Print startup banner.
fn print_banner() {
    println!(
        r#"
    ┌─┐┌─┐┬─┐┌─┐  ┬  ┬┌─┐ ┬ ┬┬┌┬┐┌─┐┌┬┐┌─┐┬─┐
    ├─┘├┤ ├┬┘├─┘  │  ││─┼┐│ ││ ││├─┤ │ │ │├┬┘
    ┴  └─┘┴└─┴    ┴─┘┴└─┘└└─┘┴─┴┘┴ ┴ ┴ └─┘┴└─
    Margin Account Liquidator v0.1.0
    "#
    );
}
