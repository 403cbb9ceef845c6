//! On-chain account model for the perpetuals exchange program.

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;

use crate::precise::PreciseInt;

/// Account address on chain.
pub type Address = Pubkey;

/// Maximum number of open positions a margin account can hold.
pub const MAX_POSITIONS: usize = 12;

/// Markets keyed by market id.
pub type MarketMap = HashMap<u32, ProgramAccount<Market>>;

/// Price feeds keyed by feed account address.
pub type PriceFeedMap = HashMap<Address, PriceFeed>;

/// A decoded program account together with its address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramAccount<T> {
    #[serde(with = "address_serde")]
    pub address: Address,
    pub account: T,
}

impl<T> ProgramAccount<T> {
    pub fn new(address: Address, account: T) -> Self {
        Self { address, account }
    }
}

/// Exchange configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    /// Exchange id (seed of the exchange address)
    pub id: u64,
    /// Listed market ids; `0` marks an empty slot
    pub market_ids: Vec<u32>,
}

impl Exchange {
    /// Market ids with empty slots removed.
    pub fn active_market_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.market_ids.iter().copied().filter(|id| *id != 0)
    }
}

/// Perpetual market listed on an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: u32,
    #[serde(with = "address_serde")]
    pub exchange: Address,
    /// Oracle price feed account backing this market
    #[serde(with = "address_serde")]
    pub price_feed: Address,
}

/// Open position inside a margin account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub market_id: u32,
    /// Signed size (negative = short)
    pub size: PreciseInt,
}

/// Collateralized margin account owned by one trader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginAccount {
    pub id: u32,
    #[serde(with = "address_serde")]
    pub exchange: Address,
    #[serde(with = "address_serde")]
    pub owner: Address,
    /// Deposited collateral
    #[serde(default)]
    pub margin: PreciseInt,
    /// Set by the program once a liquidation has started
    #[serde(default)]
    pub in_liquidation: bool,
    #[serde(default)]
    pub positions: ArrayVec<Position, MAX_POSITIONS>,
}

impl MarginAccount {
    /// Open positions, in account order.
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn in_liquidation(&self) -> bool {
        self.in_liquidation
    }
}

/// Oracle price snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceFeed {
    pub price: PreciseInt,
    #[serde(default)]
    pub confidence: PreciseInt,
    /// Unix timestamp of the last publish
    pub publish_time: i64,
}

/// Serde helpers encoding addresses as base58 strings.
pub mod address_serde {
    use super::Address;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(address: &Address, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(address)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_market_ids_skip_empty_slots() {
        let exchange = Exchange {
            id: 0,
            market_ids: vec![1, 0, 3, 0],
        };
        assert_eq!(exchange.active_market_ids().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_margin_account_json() {
        let owner = Pubkey::new_unique();
        let exchange = Pubkey::new_unique();
        let json = format!(
            r#"{{
                "id": 7,
                "exchange": "{exchange}",
                "owner": "{owner}",
                "margin": "1500.5",
                "positions": [
                    {{ "market_id": 2, "size": "-1.25" }},
                    {{ "market_id": 1, "size": "4" }}
                ]
            }}"#
        );

        let account: MarginAccount = serde_json::from_str(&json).unwrap();
        assert_eq!(account.owner, owner);
        assert!(!account.in_liquidation());
        assert_eq!(account.positions().len(), 2);
        assert_eq!(account.positions()[0].market_id, 2);
        assert!(account.positions()[0].size.is_negative());
    }

    #[test]
    fn test_position_capacity_enforced() {
        let positions: Vec<_> = (0..=MAX_POSITIONS)
            .map(|i| format!(r#"{{ "market_id": {}, "size": "1" }}"#, i + 1))
            .collect();
        let json = format!(
            r#"{{ "id": 1, "exchange": "{}", "owner": "{}", "positions": [{}] }}"#,
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            positions.join(",")
        );
        assert!(serde_json::from_str::<MarginAccount>(&json).is_err());
    }
}
