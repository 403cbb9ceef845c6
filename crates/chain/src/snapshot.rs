//! In-memory chain backed by a JSON snapshot.
//!
//! Implements [`AccountFetcher`], [`MarginEngine`] and [`LiquidationSubmitter`]
//! against a mutable copy of the snapshot. Margins come from a per-account
//! table instead of being computed. Used for dry runs and tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

use crate::accounts::{
    address_serde, Address, Exchange, MarginAccount, Market, MarketMap, PriceFeed, PriceFeedMap,
    ProgramAccount,
};
use crate::fetcher::AccountFetcher;
use crate::margin::{AccountMargins, MarginEngine};
use crate::transaction::{LiquidateParams, LiquidationRequest, LiquidationSubmitter};

const EXCHANGE_SEED: &[u8] = b"exchange";
const MARKET_SEED: &[u8] = b"market";

/// Serialized chain state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSnapshot {
    /// Exchange program id, used for address derivation
    #[serde(with = "address_serde")]
    pub program_id: Address,
    pub exchange: ProgramAccount<Exchange>,
    #[serde(default)]
    pub markets: Vec<ProgramAccount<Market>>,
    #[serde(default)]
    pub price_feeds: Vec<ProgramAccount<PriceFeed>>,
    #[serde(default)]
    pub margin_accounts: Vec<ProgramAccount<MarginAccount>>,
    /// Margin table keyed by margin account address
    #[serde(default)]
    pub margins: Vec<MarginEntry>,
}

/// Margins of a single account in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginEntry {
    #[serde(with = "address_serde")]
    pub address: Address,
    #[serde(flatten)]
    pub margins: AccountMargins,
}

/// A liquidation accepted by the snapshot chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedLiquidation {
    pub margin_account: Address,
    pub liquidator: Address,
    pub markets: Vec<Address>,
    pub price_feeds: Vec<Address>,
    pub params: Option<LiquidateParams>,
    pub recent_blockhash: Hash,
    pub signature: Signature,
}

/// In-memory chain state.
pub struct SnapshotChain {
    program_id: Address,
    exchange: RwLock<ProgramAccount<Exchange>>,
    markets: DashMap<Address, ProgramAccount<Market>>,
    price_feeds: DashMap<Address, PriceFeed>,
    /// Insertion-ordered so program scans are deterministic
    margin_accounts: RwLock<Vec<ProgramAccount<MarginAccount>>>,
    margins: DashMap<Address, AccountMargins>,
    rejected: DashSet<Address>,
    failing_fetches: AtomicUsize,
    fetch_calls: AtomicUsize,
    submissions: Mutex<Vec<SubmittedLiquidation>>,
}

impl SnapshotChain {
    /// Create a chain from a snapshot.
    pub fn new(snapshot: ChainSnapshot) -> Self {
        let markets = DashMap::new();
        for market in snapshot.markets {
            markets.insert(market.address, market);
        }

        let price_feeds = DashMap::new();
        for feed in snapshot.price_feeds {
            price_feeds.insert(feed.address, feed.account);
        }

        let margins = DashMap::new();
        for entry in snapshot.margins {
            margins.insert(entry.address, entry.margins);
        }

        Self {
            program_id: snapshot.program_id,
            exchange: RwLock::new(snapshot.exchange),
            markets,
            price_feeds,
            margin_accounts: RwLock::new(snapshot.margin_accounts),
            margins,
            rejected: DashSet::new(),
            failing_fetches: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Load a snapshot from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        let snapshot: ChainSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))?;

        info!(
            path = %path.display(),
            markets = snapshot.markets.len(),
            price_feeds = snapshot.price_feeds.len(),
            margin_accounts = snapshot.margin_accounts.len(),
            "Chain snapshot loaded"
        );

        Ok(Self::new(snapshot))
    }

    pub fn program_id(&self) -> Address {
        self.program_id
    }

    /// Address of the snapshot's exchange account.
    pub fn exchange_account_address(&self) -> Address {
        self.exchange.read().address
    }

    /// Derive the program address of an exchange.
    pub fn derive_exchange_address(&self, exchange_id: u64) -> Address {
        Pubkey::find_program_address(&[EXCHANGE_SEED, &exchange_id.to_le_bytes()], &self.program_id).0
    }

    /// Derive the program address of a market.
    pub fn derive_market_address(&self, exchange: &Address, market_id: u32) -> Address {
        Pubkey::find_program_address(
            &[MARKET_SEED, exchange.as_ref(), &market_id.to_le_bytes()],
            &self.program_id,
        )
        .0
    }

    /// Insert or replace a margin account.
    pub fn upsert_margin_account(&self, account: ProgramAccount<MarginAccount>) {
        let mut accounts = self.margin_accounts.write();
        match accounts.iter_mut().find(|a| a.address == account.address) {
            Some(existing) => *existing = account,
            None => accounts.push(account),
        }
    }

    /// Remove a margin account (closed on chain).
    pub fn remove_margin_account(&self, address: &Address) {
        self.margin_accounts.write().retain(|a| &a.address != address);
        self.margins.remove(address);
    }

    /// Set the margins reported for an account.
    pub fn set_margins(&self, address: Address, margins: AccountMargins) {
        self.margins.insert(address, margins);
    }

    /// Reject every liquidation submitted against `margin_account`.
    pub fn reject_liquidations_for(&self, margin_account: Address) {
        self.rejected.insert(margin_account);
    }

    /// Fail the next `count` fetch calls.
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Number of fetch calls served (including failed ones).
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Liquidations accepted so far.
    pub fn submissions(&self) -> Vec<SubmittedLiquidation> {
        self.submissions.lock().clone()
    }

    fn begin_fetch(&self, what: &str) -> Result<()> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            anyhow::bail!("injected fetch failure ({what})");
        }
        Ok(())
    }

    fn find_margin_account(&self, address: &Address) -> Option<ProgramAccount<MarginAccount>> {
        self.margin_accounts
            .read()
            .iter()
            .find(|a| &a.address == address)
            .cloned()
    }
}

#[async_trait]
impl AccountFetcher for SnapshotChain {
    fn exchange_address(&self, exchange_id: u64) -> Address {
        let exchange = self.exchange.read();
        if exchange.account.id == exchange_id {
            exchange.address
        } else {
            self.derive_exchange_address(exchange_id)
        }
    }

    fn market_address(&self, exchange: &Address, market_id: u32) -> Address {
        self.markets
            .iter()
            .find(|m| &m.account.exchange == exchange && m.account.id == market_id)
            .map(|m| m.address)
            .unwrap_or_else(|| self.derive_market_address(exchange, market_id))
    }

    async fn get_exchange(&self, address: &Address) -> Result<Option<Exchange>> {
        self.begin_fetch("exchange")?;
        let exchange = self.exchange.read();
        Ok((&exchange.address == address).then(|| exchange.account.clone()))
    }

    async fn get_markets(&self, addresses: &[Address]) -> Result<Vec<Option<ProgramAccount<Market>>>> {
        self.begin_fetch("markets")?;
        Ok(addresses
            .iter()
            .map(|address| self.markets.get(address).map(|m| m.clone()))
            .collect())
    }

    async fn get_margin_accounts(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<Option<ProgramAccount<MarginAccount>>>> {
        self.begin_fetch("margin accounts")?;
        Ok(addresses
            .iter()
            .map(|address| self.find_margin_account(address))
            .collect())
    }

    async fn get_all_margin_accounts(&self) -> Result<Vec<ProgramAccount<MarginAccount>>> {
        self.begin_fetch("all margin accounts")?;
        Ok(self.margin_accounts.read().clone())
    }

    async fn get_price_feeds(&self, addresses: &[Address]) -> Result<Vec<Option<PriceFeed>>> {
        self.begin_fetch("price feeds")?;
        Ok(addresses
            .iter()
            .map(|address| self.price_feeds.get(address).map(|f| f.clone()))
            .collect())
    }
}

impl MarginEngine for SnapshotChain {
    fn account_margins(
        &self,
        account: &ProgramAccount<MarginAccount>,
        _exchange: &Exchange,
        _markets: &MarketMap,
        _price_feeds: &PriceFeedMap,
        _timestamp: i64,
    ) -> AccountMargins {
        self.margins
            .get(&account.address)
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LiquidationSubmitter for SnapshotChain {
    async fn latest_blockhash(&self) -> Result<Hash> {
        Ok(Hash::new_unique())
    }

    async fn send_liquidation(
        &self,
        request: LiquidationRequest<'_>,
        signer: &Keypair,
    ) -> Result<Signature> {
        let margin_account = request.accounts.margin_account;

        if signer.pubkey() != request.accounts.liquidator {
            anyhow::bail!("signer does not match liquidator account");
        }
        if request.markets.len() != request.price_feeds.len() {
            anyhow::bail!(
                "market/price feed length mismatch ({} vs {})",
                request.markets.len(),
                request.price_feeds.len()
            );
        }
        if self.rejected.contains(&margin_account) {
            anyhow::bail!("transaction rejected for {margin_account}");
        }

        // Liquidation closes every position of the account
        {
            let mut accounts = self.margin_accounts.write();
            let account = accounts
                .iter_mut()
                .find(|a| a.address == margin_account)
                .ok_or_else(|| anyhow::anyhow!("margin account {margin_account} not found"))?;
            account.account.positions.clear();
            account.account.in_liquidation = false;
        }
        self.margins.insert(margin_account, AccountMargins::default());

        let signature = Signature::new_unique();
        debug!(
            margin_account = %margin_account,
            positions = request.markets.len(),
            signature = %signature,
            "Snapshot liquidation accepted"
        );

        self.submissions.lock().push(SubmittedLiquidation {
            margin_account,
            liquidator: request.accounts.liquidator,
            markets: request.markets.to_vec(),
            price_feeds: request.price_feeds.to_vec(),
            params: request.params.cloned(),
            recent_blockhash: request.recent_blockhash,
            signature,
        });

        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precise::PreciseInt;
    use crate::transaction::LiquidateAccounts;

    fn snapshot() -> (ChainSnapshot, Address) {
        let program_id = Pubkey::new_unique();
        let exchange = Pubkey::new_unique();
        let account = Pubkey::new_unique();
        let snapshot = ChainSnapshot {
            program_id,
            exchange: ProgramAccount::new(
                exchange,
                Exchange {
                    id: 0,
                    market_ids: vec![1],
                },
            ),
            markets: vec![ProgramAccount::new(
                Pubkey::new_unique(),
                Market {
                    id: 1,
                    exchange,
                    price_feed: Pubkey::new_unique(),
                },
            )],
            price_feeds: vec![],
            margin_accounts: vec![ProgramAccount::new(
                account,
                MarginAccount {
                    id: 0,
                    exchange,
                    owner: Pubkey::new_unique(),
                    margin: PreciseInt::from(10),
                    in_liquidation: false,
                    positions: Default::default(),
                },
            )],
            margins: vec![MarginEntry {
                address: account,
                margins: AccountMargins {
                    liquidatable: true,
                    ..Default::default()
                },
            }],
        };
        (snapshot, account)
    }

    #[tokio::test]
    async fn test_fetch_by_address_drops_unknown() {
        let (snapshot, account) = snapshot();
        let chain = SnapshotChain::new(snapshot);

        let fetched = chain
            .get_margin_accounts(&[account, Pubkey::new_unique()])
            .await
            .unwrap();
        assert!(fetched[0].is_some());
        assert!(fetched[1].is_none());
    }

    #[tokio::test]
    async fn test_exchange_and_market_addresses() {
        let (snapshot, _) = snapshot();
        let exchange = snapshot.exchange.address;
        let market = snapshot.markets[0].address;
        let chain = SnapshotChain::new(snapshot);

        assert_eq!(chain.exchange_address(0), exchange);
        assert_ne!(chain.exchange_address(1), exchange);
        assert_eq!(chain.market_address(&exchange, 1), market);
        assert_eq!(
            chain.market_address(&exchange, 9),
            chain.derive_market_address(&exchange, 9)
        );
        assert!(chain.get_exchange(&exchange).await.unwrap().is_some());
        assert!(chain.get_exchange(&market).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_fetch_failures() {
        let (snapshot, _) = snapshot();
        let chain = SnapshotChain::new(snapshot);
        chain.fail_next_fetches(2);

        assert!(chain.get_all_margin_accounts().await.is_err());
        assert!(chain.get_all_margin_accounts().await.is_err());
        assert_eq!(chain.get_all_margin_accounts().await.unwrap().len(), 1);
        assert_eq!(chain.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn test_liquidation_clears_account() {
        let (snapshot, account) = snapshot();
        let exchange = snapshot.exchange.address;
        let chain = SnapshotChain::new(snapshot);
        let signer = Keypair::new();
        let accounts = LiquidateAccounts {
            margin_account: account,
            exchange,
            owner: Pubkey::new_unique(),
            liquidator: signer.pubkey(),
            liquidator_margin_account: Pubkey::new_unique(),
        };
        let request = LiquidationRequest {
            accounts,
            markets: &[],
            price_feeds: &[],
            params: None,
            recent_blockhash: chain.latest_blockhash().await.unwrap(),
        };

        chain.send_liquidation(request, &signer).await.unwrap();
        assert_eq!(chain.submissions().len(), 1);

        let fetched = chain.get_margin_accounts(&[account]).await.unwrap();
        let margins = chain.account_margins(
            fetched[0].as_ref().unwrap(),
            &Exchange {
                id: 0,
                market_ids: vec![],
            },
            &MarketMap::new(),
            &PriceFeedMap::new(),
            0,
        );
        assert!(!margins.is_immediately_liquidatable());

        chain.reject_liquidations_for(account);
        assert!(chain.send_liquidation(request, &signer).await.is_err());
        assert_eq!(chain.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_demo_snapshot_parses() {
        let snapshot: ChainSnapshot =
            serde_json::from_str(include_str!("../../../demos/snapshot.json")).unwrap();
        let exchange = snapshot.exchange.address;
        let chain = SnapshotChain::new(snapshot);

        let accounts = chain.get_all_margin_accounts().await.unwrap();
        assert_eq!(accounts.len(), 3);
        let market = chain.market_address(&exchange, 2);
        assert_eq!(chain.markets.get(&market).unwrap().account.id, 2);

        let liquidatable = accounts
            .iter()
            .filter(|a| {
                chain
                    .margins
                    .get(&a.address)
                    .is_some_and(|m| m.is_immediately_liquidatable())
            })
            .count();
        assert_eq!(liquidatable, 1);
    }

    #[test]
    fn test_snapshot_json() {
        let (snapshot, account) = snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: ChainSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.margins[0].address, account);
        assert!(parsed.margins[0].margins.liquidatable);
    }
}
