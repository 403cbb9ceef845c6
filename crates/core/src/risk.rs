//! Risk classification of margin accounts.
//!
//! An account is at risk when the margin engine reports it as immediately
//! liquidatable, or when its margin utilization (required / available) plus
//! the watch threshold exceeds 1.

use chrono::Utc;
use perp_liquidator_chain::{
    AccountMargins, Exchange, MarginAccount, MarginEngine, MarketMap, PreciseInt, PriceFeedMap,
    ProgramAccount,
};
use std::sync::Arc;

/// Market state an account is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct RiskContext<'a> {
    pub exchange: &'a Exchange,
    pub markets: &'a MarketMap,
    pub price_feeds: &'a PriceFeedMap,
}

/// Required / available margin, `None` when nothing is available.
pub fn margin_utilization(margins: &AccountMargins) -> Option<PreciseInt> {
    let available = margins.total_available_margin();
    if available.is_zero() {
        return None;
    }
    margins.total_required_margin().checked_div(available)
}

/// `required / available + watch / 100 > 1`. Never fires when either
/// margin is zero; a utilization too large to represent always fires.
pub fn exceeds_watch_threshold(margins: &AccountMargins, margin_percentage_watch: u32) -> bool {
    let required = margins.total_required_margin();
    let available = margins.total_available_margin();
    if required.is_zero() || available.is_zero() {
        return false;
    }
    let Some(utilization) = required.checked_div(available) else {
        return true;
    };
    let watch = PreciseInt::from_decimal(i64::from(margin_percentage_watch), -2);
    utilization
        .checked_add(watch)
        .map_or(true, |total| total > PreciseInt::ONE)
}

pub fn is_at_risk(margins: &AccountMargins, margin_percentage_watch: u32) -> bool {
    margins.is_immediately_liquidatable() || exceeds_watch_threshold(margins, margin_percentage_watch)
}

/// Whether a liquidation may be submitted: the program already started one,
/// or the engine reports the account as liquidatable.
pub fn is_liquidation_eligible(account: &MarginAccount, margins: &AccountMargins) -> bool {
    account.in_liquidation() || margins.is_immediately_liquidatable()
}

/// Accounts of `accounts` that are at risk at `timestamp`, in input order.
pub fn at_risk_accounts<E: MarginEngine + ?Sized>(
    engine: &E,
    accounts: &[ProgramAccount<MarginAccount>],
    ctx: RiskContext<'_>,
    margin_percentage_watch: u32,
    timestamp: i64,
) -> Vec<ProgramAccount<MarginAccount>> {
    accounts
        .iter()
        .filter(|account| {
            let margins = engine.account_margins(
                account,
                ctx.exchange,
                ctx.markets,
                ctx.price_feeds,
                timestamp,
            );
            is_at_risk(&margins, margin_percentage_watch)
        })
        .cloned()
        .collect()
}

/// Margin engine bound to a watch threshold, evaluated at wall-clock time.
pub struct RiskClassifier<E: ?Sized> {
    engine: Arc<E>,
    margin_percentage_watch: u32,
}

impl<E: MarginEngine + ?Sized> RiskClassifier<E> {
    pub fn new(engine: Arc<E>, margin_percentage_watch: u32) -> Self {
        Self {
            engine,
            margin_percentage_watch,
        }
    }

    pub fn margin_percentage_watch(&self) -> u32 {
        self.margin_percentage_watch
    }

    /// Margins of `account` at the current second.
    pub fn margins(&self, account: &ProgramAccount<MarginAccount>, ctx: RiskContext<'_>) -> AccountMargins {
        self.engine.account_margins(
            account,
            ctx.exchange,
            ctx.markets,
            ctx.price_feeds,
            Utc::now().timestamp(),
        )
    }

    pub fn classify(
        &self,
        accounts: &[ProgramAccount<MarginAccount>],
        ctx: RiskContext<'_>,
    ) -> Vec<ProgramAccount<MarginAccount>> {
        at_risk_accounts(
            self.engine.as_ref(),
            accounts,
            ctx,
            self.margin_percentage_watch,
            Utc::now().timestamp(),
        )
    }
}
