//! Shared fixtures for unit tests.

use perp_liquidator_chain::{
    AccountMargins, ChainSnapshot, Exchange, MarginAccount, Market, MarketMap, Position,
    PreciseInt, PriceFeed, ProgramAccount,
};
use solana_sdk::pubkey::Pubkey;

/// Snapshot with markets 1 and 2 (plus an empty slot) and their price feeds.
pub fn snapshot() -> ChainSnapshot {
    let exchange = Pubkey::new_unique();
    let mut markets = Vec::new();
    let mut price_feeds = Vec::new();

    for id in [1u32, 2] {
        let feed = Pubkey::new_unique();
        markets.push(ProgramAccount::new(
            Pubkey::new_unique(),
            Market {
                id,
                exchange,
                price_feed: feed,
            },
        ));
        price_feeds.push(ProgramAccount::new(
            feed,
            PriceFeed {
                price: PreciseInt::from(100 * i64::from(id)),
                confidence: PreciseInt::ZERO,
                publish_time: 0,
            },
        ));
    }

    ChainSnapshot {
        program_id: Pubkey::new_unique(),
        exchange: ProgramAccount::new(
            exchange,
            Exchange {
                id: 0,
                market_ids: vec![1, 0, 2],
            },
        ),
        markets,
        price_feeds,
        margin_accounts: Vec::new(),
        margins: Vec::new(),
    }
}

pub fn market_map(snapshot: &ChainSnapshot) -> MarketMap {
    snapshot
        .markets
        .iter()
        .map(|m| (m.account.id, m.clone()))
        .collect()
}

/// Margin account on the snapshot's exchange with one long position per
/// market id.
pub fn margin_account(snapshot: &ChainSnapshot, market_ids: &[u32]) -> ProgramAccount<MarginAccount> {
    let positions = market_ids
        .iter()
        .map(|&market_id| Position {
            market_id,
            size: PreciseInt::ONE,
        })
        .collect();

    ProgramAccount::new(
        Pubkey::new_unique(),
        MarginAccount {
            id: 0,
            exchange: snapshot.exchange.address,
            owner: Pubkey::new_unique(),
            margin: PreciseInt::from(1_000),
            in_liquidation: false,
            positions,
        },
    )
}

pub fn margins(required: i64, available: i64, liquidatable: bool) -> AccountMargins {
    AccountMargins {
        total_required_margin: PreciseInt::from(required),
        required_liquidation_fee_margin: PreciseInt::from(required / 10),
        available_margin: PreciseInt::from(available),
        liquidatable,
    }
}
