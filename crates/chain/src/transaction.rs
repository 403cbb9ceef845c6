//! Liquidation transaction submission.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::hash::Hash;
use solana_sdk::signature::{Keypair, Signature};

use crate::accounts::Address;

/// Account roles of a liquidation instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidateAccounts {
    pub margin_account: Address,
    pub exchange: Address,
    pub owner: Address,
    /// Signer and fee payer
    pub liquidator: Address,
    /// Margin account credited with the liquidation fee
    pub liquidator_margin_account: Address,
}

/// Optional extra instruction parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidateParams {
    /// Compute unit limit for the transaction
    #[serde(default)]
    pub compute_unit_limit: Option<u32>,
    /// Priority fee in micro-lamports per compute unit
    #[serde(default)]
    pub compute_unit_price: Option<u64>,
}

/// Everything needed to build one liquidation transaction.
///
/// `markets` and `price_feeds` are parallel arrays in the account's
/// position order.
#[derive(Debug, Clone, Copy)]
pub struct LiquidationRequest<'a> {
    pub accounts: LiquidateAccounts,
    pub markets: &'a [Address],
    pub price_feeds: &'a [Address],
    pub params: Option<&'a LiquidateParams>,
    pub recent_blockhash: Hash,
}

/// Builds, signs and submits liquidation transactions.
#[async_trait]
pub trait LiquidationSubmitter: Send + Sync {
    /// Most recent network checkpoint to sign against.
    async fn latest_blockhash(&self) -> Result<Hash>;

    /// Submit one liquidation and wait for confirmation.
    async fn send_liquidation(
        &self,
        request: LiquidationRequest<'_>,
        signer: &Keypair,
    ) -> Result<Signature>;
}
