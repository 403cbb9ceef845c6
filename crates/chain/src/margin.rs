//! Margin engine abstraction.

use serde::{Deserialize, Serialize};

use crate::accounts::{Exchange, MarginAccount, MarketMap, PriceFeedMap, ProgramAccount};
use crate::precise::PreciseInt;

/// Margin requirements of one account at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountMargins {
    /// Total margin required to keep every position open
    #[serde(default)]
    pub total_required_margin: PreciseInt,
    /// Part of the requirement paid to the liquidator as a fee
    #[serde(default)]
    pub required_liquidation_fee_margin: PreciseInt,
    /// Collateral plus unrealized pnl
    #[serde(default)]
    pub available_margin: PreciseInt,
    /// Whether the program would accept a liquidation right now
    #[serde(default)]
    pub liquidatable: bool,
}

impl AccountMargins {
    pub fn is_immediately_liquidatable(&self) -> bool {
        self.liquidatable
    }

    pub fn total_required_margin(&self) -> PreciseInt {
        self.total_required_margin
    }

    pub fn total_available_margin(&self) -> PreciseInt {
        self.available_margin
    }

    pub fn required_liquidation_fee_margin(&self) -> PreciseInt {
        self.required_liquidation_fee_margin
    }
}

/// Computes required vs. available margin for an account.
pub trait MarginEngine: Send + Sync {
    /// Evaluate `account` against the given market state at `timestamp`
    /// (unix seconds).
    fn account_margins(
        &self,
        account: &ProgramAccount<MarginAccount>,
        exchange: &Exchange,
        markets: &MarketMap,
        price_feeds: &PriceFeedMap,
        timestamp: i64,
    ) -> AccountMargins;
}
