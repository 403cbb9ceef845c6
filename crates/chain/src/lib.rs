//! Liquidator chain interaction layer.
//!
//! This crate provides:
//! - The exchange program account model (exchange, markets, margin accounts, price feeds)
//! - Fixed-point values for margins and prices
//! - Collaborator traits for fetching accounts, computing margins and submitting liquidations
//! - An in-memory snapshot chain implementing all three traits
//!
//! Program bindings and RPC transport plug in behind the traits.

pub mod accounts;
mod fetcher;
mod margin;
mod precise;
mod snapshot;
mod transaction;

pub use accounts::{
    Address, Exchange, MarginAccount, Market, MarketMap, Position, PriceFeed, PriceFeedMap,
    ProgramAccount, MAX_POSITIONS,
};
pub use fetcher::AccountFetcher;
pub use margin::{AccountMargins, MarginEngine};
pub use precise::PreciseInt;
pub use snapshot::{ChainSnapshot, MarginEntry, SnapshotChain, SubmittedLiquidation};
pub use transaction::{LiquidateAccounts, LiquidateParams, LiquidationRequest, LiquidationSubmitter};
