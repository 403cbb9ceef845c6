//! Liquidator core logic.
//!
//! This crate provides the core liquidation bot functionality:
//! - Interval-gated refreshable caches with bounded retry
//! - At-risk classification of margin accounts
//! - Liquidation execution (one transaction per account)
//! - Orchestration of the refresh/liquidate loop
//! - Bot statistics and configuration

pub mod config;
mod liquidator;
mod orchestrator;
mod refreshable;
pub mod retry;
pub mod risk;
mod stats;

#[cfg(test)]
mod test_support;

pub use config::{BotConfig, Credentials, ExchangeTarget};
pub use liquidator::{market_and_price_feed_addresses, AddressList, LiquidationError, Liquidator};
pub use orchestrator::{
    pacing_delay, AccountPopulation, AtRiskSet, ExchangeState, Orchestrator, OrchestratorConfig,
    PassOutcome, PriceMarketState, RefreshedCaches, TickReport,
};
pub use refreshable::Refreshable;
pub use retry::RetryPolicy;
pub use risk::{RiskClassifier, RiskContext};
pub use stats::{BotStats, LiquidationRecord};
