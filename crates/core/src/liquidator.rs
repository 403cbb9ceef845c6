//! Liquidation executor for margin accounts.

use perp_liquidator_chain::{
    Address, LiquidateAccounts, LiquidateParams, LiquidationRequest, LiquidationSubmitter,
    MarginAccount, MarketMap, ProgramAccount, MAX_POSITIONS,
};
use smallvec::SmallVec;
use solana_sdk::signature::{Keypair, Signature, Signer};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Address list sized for a full margin account.
pub type AddressList = SmallVec<[Address; MAX_POSITIONS]>;

/// Liquidation failure.
#[derive(Debug, Error)]
pub enum LiquidationError {
    #[error("position references market {market_id} missing from the market map")]
    MissingMarket { market_id: u32 },

    #[error("failed to get recent blockhash: {0:#}")]
    Blockhash(anyhow::Error),

    #[error("liquidation rejected: {0:#}")]
    Rejected(anyhow::Error),
}

impl LiquidationError {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingMarket { .. } => "missing_market",
            Self::Blockhash(_) => "blockhash",
            Self::Rejected(_) => "rejected",
        }
    }

    /// Whether the market configuration is broken, as opposed to a single
    /// transaction failing.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingMarket { .. })
    }
}

/// Market and price feed addresses of `account`'s positions, as parallel
/// arrays in position order.
pub fn market_and_price_feed_addresses(
    account: &MarginAccount,
    markets: &MarketMap,
) -> Result<(AddressList, AddressList), LiquidationError> {
    let mut market_addresses = AddressList::new();
    let mut price_feeds = AddressList::new();

    for position in account.positions() {
        let market = markets
            .get(&position.market_id)
            .ok_or(LiquidationError::MissingMarket {
                market_id: position.market_id,
            })?;
        market_addresses.push(market.address);
        price_feeds.push(market.account.price_feed);
    }

    Ok((market_addresses, price_feeds))
}

/// Submits one liquidation transaction per call.
pub struct Liquidator<S: ?Sized> {
    submitter: Arc<S>,
    signer: Arc<Keypair>,
    /// Margin account credited with liquidation fees
    liquidator_margin_account: Address,
    params: Option<LiquidateParams>,
}

impl<S: LiquidationSubmitter + ?Sized> Liquidator<S> {
    pub fn new(submitter: Arc<S>, signer: Arc<Keypair>, liquidator_margin_account: Address) -> Self {
        Self {
            submitter,
            signer,
            liquidator_margin_account,
            params: None,
        }
    }

    /// Attach extra instruction parameters to every submission.
    pub fn with_params(mut self, params: LiquidateParams) -> Self {
        self.params = Some(params);
        self
    }

    /// Public key of the signing liquidator.
    pub fn liquidator(&self) -> Address {
        self.signer.pubkey()
    }

    pub fn liquidator_margin_account(&self) -> Address {
        self.liquidator_margin_account
    }

    /// Liquidate `account` and wait for confirmation.
    #[instrument(skip(self, account, markets), fields(account = %account.address))]
    pub async fn liquidate(
        &self,
        account: &ProgramAccount<MarginAccount>,
        markets: &MarketMap,
    ) -> Result<Signature, LiquidationError> {
        let start = Instant::now();
        let (market_addresses, price_feeds) = market_and_price_feed_addresses(&account.account, markets)?;

        let recent_blockhash = self
            .submitter
            .latest_blockhash()
            .await
            .map_err(LiquidationError::Blockhash)?;

        let request = LiquidationRequest {
            accounts: LiquidateAccounts {
                margin_account: account.address,
                exchange: account.account.exchange,
                owner: account.account.owner,
                liquidator: self.signer.pubkey(),
                liquidator_margin_account: self.liquidator_margin_account,
            },
            markets: market_addresses.as_slice(),
            price_feeds: price_feeds.as_slice(),
            params: self.params.as_ref(),
            recent_blockhash,
        };

        debug!(
            positions = market_addresses.len(),
            blockhash = %recent_blockhash,
            "Submitting liquidation"
        );

        let signature = self
            .submitter
            .send_liquidation(request, &self.signer)
            .await
            .map_err(LiquidationError::Rejected)?;

        info!(
            signature = %signature,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Liquidation confirmed"
        );

        Ok(signature)
    }
}
