//! Cumulative bot statistics and the periodic status report.

use chrono::{DateTime, Utc};
use perp_liquidator_chain::{AccountMargins, Address, PreciseInt};
use solana_sdk::signature::Signature;
use std::fmt;
use std::time::{Duration, Instant};

use crate::risk::margin_utilization;

/// One confirmed liquidation.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidationRecord {
    pub address: Address,
    /// Liquidation fee margin realized by the liquidator
    pub profit: PreciseInt,
    pub liquidated_at: DateTime<Utc>,
    pub signature: Signature,
}

/// Counters fed by the orchestrator after every tick.
#[derive(Debug)]
pub struct BotStats {
    started: Instant,
    liquidations: Vec<LiquidationRecord>,
    failed_attempts: u64,
    price_check_interval: Duration,
    /// Utilization of each at-risk account at the last update
    utilizations: Vec<PreciseInt>,
    at_risk_accounts: Option<usize>,
    background_refreshing: bool,
}

impl BotStats {
    pub fn new(price_check_interval: Duration) -> Self {
        Self {
            started: Instant::now(),
            liquidations: Vec::new(),
            failed_attempts: 0,
            price_check_interval,
            utilizations: Vec::new(),
            at_risk_accounts: None,
            background_refreshing: false,
        }
    }

    /// Append a confirmed liquidation.
    pub fn add_liquidated_account(&mut self, address: Address, profit: PreciseInt, signature: Signature) {
        self.liquidations.push(LiquidationRecord {
            address,
            profit,
            liquidated_at: Utc::now(),
            signature,
        });
    }

    pub fn record_failure(&mut self) {
        self.failed_attempts += 1;
    }

    /// Refresh the per-tick view. `at_risk` is `None` before the first
    /// classification.
    pub fn update(
        &mut self,
        price_check_interval: Duration,
        at_risk: Option<&[AccountMargins]>,
        background_refreshing: bool,
    ) {
        self.price_check_interval = price_check_interval;
        self.background_refreshing = background_refreshing;
        self.at_risk_accounts = at_risk.map(<[AccountMargins]>::len);
        self.utilizations = at_risk
            .unwrap_or_default()
            .iter()
            .filter_map(margin_utilization)
            .collect();
    }

    pub fn liquidations(&self) -> &[LiquidationRecord] {
        &self.liquidations
    }

    pub fn accounts_liquidated(&self) -> usize {
        self.liquidations.len()
    }

    pub fn failed_attempts(&self) -> u64 {
        self.failed_attempts
    }

    pub fn total_profit(&self) -> PreciseInt {
        self.liquidations.iter().map(|r| r.profit).sum()
    }

    pub fn last_liquidation(&self) -> Option<&LiquidationRecord> {
        self.liquidations.last()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Highest margin utilization among at-risk accounts.
    pub fn max_utilization(&self) -> Option<PreciseInt> {
        self.utilizations.iter().copied().max()
    }

    /// Mean margin utilization among at-risk accounts, `None` when the
    /// total does not fit.
    pub fn average_utilization(&self) -> Option<PreciseInt> {
        if self.utilizations.is_empty() {
            return None;
        }
        let total = self
            .utilizations
            .iter()
            .try_fold(PreciseInt::ZERO, |acc, u| acc.checked_add(*u))?;
        total.checked_div(PreciseInt::from(self.utilizations.len() as i64))
    }

    pub fn at_risk_accounts(&self) -> Option<usize> {
        self.at_risk_accounts
    }

    pub fn is_background_refreshing(&self) -> bool {
        self.background_refreshing
    }
}

fn display_or_none<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

impl fmt::Display for BotStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "----------------BOT STATS----------------")?;
        writeln!(f, "Accounts Liquidated: {}", self.accounts_liquidated())?;
        writeln!(f, "Failed Attempts: {}", self.failed_attempts)?;
        writeln!(f, "Total Profit: {}", self.total_profit())?;
        if let Some(last) = self.last_liquidation() {
            writeln!(f, "Last Liquidation: {}", last.liquidated_at.to_rfc3339())?;
        }
        writeln!(f, "Total Time Running: {:.1} seconds", self.uptime().as_secs_f64())?;
        writeln!(
            f,
            "Current Price Check Interval: {}ms",
            self.price_check_interval.as_millis()
        )?;
        writeln!(
            f,
            "Closest Percentage Margin Used Account: {}",
            display_or_none(self.max_utilization())
        )?;
        writeln!(
            f,
            "Average Percentage Margin Used (at risk only): {}",
            display_or_none(self.average_utilization())
        )?;
        writeln!(
            f,
            "Accounts Over Margin Percentage: {}",
            display_or_none(self.at_risk_accounts)
        )?;
        writeln!(
            f,
            "Is Background Updating Margin Accounts: {}",
            self.background_refreshing
        )?;
        write!(f, "-----------------------------------------")
    }
}
