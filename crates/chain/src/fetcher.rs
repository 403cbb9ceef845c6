//! Account fetching abstraction.
//!
//! Implementations wrap the program bindings and the RPC transport. Batch
//! fetches return one entry per requested address, `None` where the account
//! does not exist or could not be decoded.

use anyhow::Result;
use async_trait::async_trait;

use crate::accounts::{Address, Exchange, MarginAccount, Market, PriceFeed, ProgramAccount};

/// Read access to exchange program accounts.
#[async_trait]
pub trait AccountFetcher: Send + Sync {
    /// Address of the exchange with the given id.
    fn exchange_address(&self, exchange_id: u64) -> Address;

    /// Address of a market listed on `exchange`.
    fn market_address(&self, exchange: &Address, market_id: u32) -> Address;

    /// Fetch the exchange configuration.
    async fn get_exchange(&self, address: &Address) -> Result<Option<Exchange>>;

    /// Batch fetch markets.
    async fn get_markets(&self, addresses: &[Address]) -> Result<Vec<Option<ProgramAccount<Market>>>>;

    /// Batch fetch margin accounts.
    async fn get_margin_accounts(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<Option<ProgramAccount<MarginAccount>>>>;

    /// Fetch every margin account owned by the program.
    async fn get_all_margin_accounts(&self) -> Result<Vec<ProgramAccount<MarginAccount>>>;

    /// Batch fetch price feeds.
    async fn get_price_feeds(&self, addresses: &[Address]) -> Result<Vec<Option<PriceFeed>>>;
}
