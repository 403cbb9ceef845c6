//! Configuration for the liquidator.
//!
//! This module provides:
//! - Bot runtime configuration (profiles, refresh cadences, risk threshold, retry policy)
//! - Credentials (signer, liquidator margin account, target exchange)

mod bot;
mod credentials;

pub use bot::{
    env as config_env, BotConfig, LoggingConfig, RefreshConfig, RiskConfig, ScannerTimingConfig,
};
pub use credentials::{decode_keypair, env as credentials_env, Credentials, ExchangeTarget};
