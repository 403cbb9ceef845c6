//! Liquidation loop orchestration.
//!
//! Owns four refreshable caches and drives them once per tick in dependency
//! order:
//!
//! 1. exchange state (exchange configuration and listed markets)
//! 2. price/market maps (derived from the exchange's markets)
//! 3. at-risk accounts (re-fetch of previously flagged addresses)
//! 4. full account population; every completed refresh reseeds the at-risk
//!    set from a fresh classification
//!
//! After the caches, every at-risk account is re-validated against current
//! prices and liquidated if eligible. The loop then sleeps for the rest of the
//! fast interval.

use anyhow::{anyhow, Context, Result};
use perp_liquidator_chain::{
    AccountFetcher, AccountMargins, Address, Exchange, LiquidationSubmitter, MarginAccount,
    MarginEngine, Market, MarketMap, PriceFeedMap, ProgramAccount,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::liquidator::Liquidator;
use crate::refreshable::Refreshable;
use crate::retry::RetryPolicy;
use crate::risk::{is_liquidation_eligible, RiskClassifier, RiskContext};
use crate::stats::BotStats;

/// Exchange configuration and its listed markets.
#[derive(Debug, Clone)]
pub struct ExchangeState {
    pub address: Address,
    pub exchange: Exchange,
    pub markets: Vec<ProgramAccount<Market>>,
}

/// Markets by id and their price feeds by address.
#[derive(Debug, Clone, Default)]
pub struct PriceMarketState {
    pub markets: MarketMap,
    pub price_feeds: PriceFeedMap,
}

pub type AccountPopulation = Vec<ProgramAccount<MarginAccount>>;

/// Accounts flagged near or past the liquidation threshold.
pub type AtRiskSet = Vec<ProgramAccount<MarginAccount>>;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Price and at-risk refresh interval, also the loop cadence
    pub price_feed_interval: Duration,
    /// Full population rescan interval
    pub full_account_interval: Duration,
    pub exchange_interval: Duration,
    pub margin_percentage_watch: u32,
    /// Applied to every cache refresh
    pub retry: RetryPolicy,
    /// Log the status report after every tick
    pub enable_status: bool,
}

impl OrchestratorConfig {
    pub fn from_bot_config(config: &BotConfig) -> Self {
        Self {
            price_feed_interval: config.scanner.price_feed_interval(),
            full_account_interval: config.scanner.full_account_interval(),
            exchange_interval: config.scanner.exchange_interval(),
            margin_percentage_watch: config.risk.margin_percentage_watch,
            retry: RetryPolicy::from_config(&config.refresh),
            enable_status: config.logging.enable_status,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_bot_config(&BotConfig::default())
    }
}

/// Caches refreshed during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshedCaches {
    pub exchange: bool,
    pub price_maps: bool,
    pub at_risk: bool,
    pub population: bool,
}

/// Result of the liquidation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Exchange or price state not loaded yet
    ColdStart,
    Completed {
        checked: usize,
        attempted: usize,
        liquidated: usize,
        failed: usize,
    },
}

/// Summary of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub elapsed: Duration,
    pub refreshed: RefreshedCaches,
    /// At-risk count when the set was reseeded this tick
    pub reseeded: Option<usize>,
    pub outcome: PassOutcome,
}

/// Sleep needed after a tick that took `elapsed` to hold `interval` cadence.
pub fn pacing_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Drives the refresh caches and the liquidation pass.
pub struct Orchestrator<E, S> {
    exchange: Arc<Refreshable<ExchangeState>>,
    price_maps: Refreshable<PriceMarketState>,
    at_risk: Refreshable<AtRiskSet>,
    population: Refreshable<AccountPopulation>,
    classifier: RiskClassifier<E>,
    liquidator: Liquidator<S>,
    stats: BotStats,
    config: OrchestratorConfig,
}

impl<E, S> Orchestrator<E, S>
where
    E: MarginEngine,
    S: LiquidationSubmitter,
{
    pub fn new<F: AccountFetcher + 'static>(
        fetcher: Arc<F>,
        engine: Arc<E>,
        liquidator: Liquidator<S>,
        exchange_address: Address,
        config: OrchestratorConfig,
    ) -> Self {
        let exchange = {
            let fetcher = fetcher.clone();
            Arc::new(
                Refreshable::new("exchange", config.exchange_interval, move |_| {
                    let fetcher = fetcher.clone();
                    async move { load_exchange_state(fetcher.as_ref(), exchange_address).await }
                })
                .with_retry(config.retry.clone()),
            )
        };

        let price_maps = {
            let fetcher = fetcher.clone();
            let exchange = exchange.clone();
            Refreshable::new("price_maps", config.price_feed_interval, move |_| {
                let fetcher = fetcher.clone();
                let state = exchange.current_value();
                async move {
                    let state = state.ok_or_else(|| anyhow!("exchange state not loaded"))?;
                    load_price_maps(fetcher.as_ref(), &state.markets).await
                }
            })
            .with_retry(config.retry.clone())
        };

        let at_risk = {
            let fetcher = fetcher.clone();
            Refreshable::new("at_risk", config.price_feed_interval, move |previous| {
                let fetcher = fetcher.clone();
                async move { refetch_accounts(fetcher.as_ref(), previous.as_deref()).await }
            })
            .with_retry(config.retry.clone())
        };

        let population = {
            let fetcher = fetcher.clone();
            Refreshable::new("population", config.full_account_interval, move |_| {
                let fetcher = fetcher.clone();
                async move {
                    fetcher
                        .get_all_margin_accounts()
                        .await
                        .context("failed to fetch all margin accounts")
                }
            })
            .with_retry(config.retry.clone())
        };

        Self {
            exchange,
            price_maps,
            at_risk,
            population,
            classifier: RiskClassifier::new(engine, config.margin_percentage_watch),
            liquidator,
            stats: BotStats::new(config.price_feed_interval),
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn stats(&self) -> &BotStats {
        &self.stats
    }

    pub fn exchange_state(&self) -> Option<Arc<ExchangeState>> {
        self.exchange.current_value()
    }

    pub fn at_risk_accounts(&self) -> Option<Arc<AtRiskSet>> {
        self.at_risk.current_value()
    }

    /// Run one tick: refresh stale caches, then the liquidation pass.
    ///
    /// Refresh failures (after the retry policy) and positions on markets
    /// missing from the market map are returned; other liquidation failures
    /// are counted per account.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let start = Instant::now();
        let mut refreshed = RefreshedCaches::default();

        if self.exchange.needs_update() {
            let state = self.exchange.update().await?;
            info!(
                cache = "exchange",
                exchange = %state.address,
                markets = state.markets.len(),
                "Exchange state refreshed"
            );
            refreshed.exchange = true;
        }

        if self.exchange.current_value().is_some() && self.price_maps.needs_update() {
            let maps = self.price_maps.update().await?;
            debug!(
                cache = "price_maps",
                markets = maps.markets.len(),
                price_feeds = maps.price_feeds.len(),
                "Price maps refreshed"
            );
            refreshed.price_maps = true;
        }

        if self.at_risk.needs_update() {
            let accounts = self.at_risk.update().await?;
            debug!(cache = "at_risk", accounts = accounts.len(), "At-risk accounts refreshed");
            refreshed.at_risk = true;
        }

        let mut reseeded = None;
        if self.population.needs_update() {
            let population = self.population.update().await?;
            refreshed.population = true;

            if let (Some(exchange), Some(maps)) =
                (self.exchange.current_value(), self.price_maps.current_value())
            {
                let ctx = RiskContext {
                    exchange: &exchange.exchange,
                    markets: &maps.markets,
                    price_feeds: &maps.price_feeds,
                };
                let at_risk = self.classifier.classify(&population, ctx);
                info!(
                    population = population.len(),
                    at_risk = at_risk.len(),
                    margin_percentage_watch = self.classifier.margin_percentage_watch(),
                    "At-risk accounts reseeded"
                );
                reseeded = Some(at_risk.len());
                self.at_risk.reseed(at_risk);
            } else {
                info!(population = population.len(), "Margin accounts refreshed");
            }
        }

        let outcome = match (self.exchange.current_value(), self.price_maps.current_value()) {
            (Some(exchange), Some(maps)) => {
                let ctx = RiskContext {
                    exchange: &exchange.exchange,
                    markets: &maps.markets,
                    price_feeds: &maps.price_feeds,
                };
                let at_risk = self.at_risk.current_value().unwrap_or_default();
                let outcome = self.liquidation_pass(&at_risk, ctx).await?;
                self.update_stats(&at_risk, ctx);
                outcome
            }
            _ => {
                debug!("Exchange or price state not loaded, skipping liquidation pass");
                PassOutcome::ColdStart
            }
        };

        Ok(TickReport {
            elapsed: start.elapsed(),
            refreshed,
            reseeded,
            outcome,
        })
    }

    /// Tick forever at the fast interval. Returns only on a refresh failure.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            price_feed_interval_ms = self.config.price_feed_interval.as_millis() as u64,
            full_account_interval_ms = self.config.full_account_interval.as_millis() as u64,
            liquidator = %self.liquidator.liquidator(),
            "Starting liquidation loop"
        );

        loop {
            self.paced_tick().await?;
        }
    }

    /// One tick followed by the sleep that holds the fast interval cadence.
    async fn paced_tick(&mut self) -> Result<TickReport> {
        let report = self.tick().await?;
        let delay = pacing_delay(self.config.price_feed_interval, report.elapsed);
        if delay.is_zero() {
            debug!(
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Tick overran interval"
            );
        }
        sleep(delay).await;
        Ok(report)
    }

    async fn liquidation_pass(
        &mut self,
        accounts: &[ProgramAccount<MarginAccount>],
        ctx: RiskContext<'_>,
    ) -> Result<PassOutcome> {
        let (mut attempted, mut liquidated, mut failed) = (0, 0, 0);

        for account in accounts {
            let margins = self.classifier.margins(account, ctx);
            if !is_liquidation_eligible(&account.account, &margins) {
                continue;
            }

            attempted += 1;
            info!(
                account = %account.address,
                in_liquidation = account.account.in_liquidation(),
                "Liquidating account"
            );

            match self.liquidator.liquidate(account, ctx.markets).await {
                Ok(signature) => {
                    let profit = margins.required_liquidation_fee_margin();
                    info!(
                        account = %account.address,
                        signature = %signature,
                        profit = %profit,
                        "Account liquidated"
                    );
                    self.stats
                        .add_liquidated_account(account.address, profit, signature);
                    liquidated += 1;
                }
                Err(e) if e.is_fatal() => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("cannot liquidate account {}", account.address)));
                }
                Err(e) => {
                    warn!(
                        account = %account.address,
                        kind = e.kind(),
                        error = %e,
                        "Liquidation failed"
                    );
                    self.stats.record_failure();
                    failed += 1;
                }
            }
        }

        Ok(PassOutcome::Completed {
            checked: accounts.len(),
            attempted,
            liquidated,
            failed,
        })
    }

    fn update_stats(&mut self, at_risk: &[ProgramAccount<MarginAccount>], ctx: RiskContext<'_>) {
        let margins: Vec<AccountMargins> = at_risk
            .iter()
            .map(|account| self.classifier.margins(account, ctx))
            .collect();

        self.stats.update(
            self.config.price_feed_interval,
            Some(&margins),
            self.population.is_refreshing(),
        );

        if self.config.enable_status {
            info!("\n{}", self.stats);
        }
    }
}

async fn load_exchange_state<F: AccountFetcher + ?Sized>(
    fetcher: &F,
    address: Address,
) -> Result<ExchangeState> {
    let exchange = fetcher
        .get_exchange(&address)
        .await
        .context("failed to fetch exchange")?
        .ok_or_else(|| anyhow!("exchange account {address} not found"))?;

    let market_addresses: Vec<Address> = exchange
        .active_market_ids()
        .map(|id| fetcher.market_address(&address, id))
        .collect();

    let markets: Vec<_> = fetcher
        .get_markets(&market_addresses)
        .await
        .context("failed to fetch markets")?
        .into_iter()
        .flatten()
        .collect();

    if markets.len() < market_addresses.len() {
        warn!(
            expected = market_addresses.len(),
            found = markets.len(),
            "Some listed markets were not found"
        );
    }

    Ok(ExchangeState {
        address,
        exchange,
        markets,
    })
}

async fn load_price_maps<F: AccountFetcher + ?Sized>(
    fetcher: &F,
    markets: &[ProgramAccount<Market>],
) -> Result<PriceMarketState> {
    let feed_addresses: Vec<Address> = markets.iter().map(|m| m.account.price_feed).collect();
    let feeds = fetcher
        .get_price_feeds(&feed_addresses)
        .await
        .context("failed to fetch price feeds")?;

    let price_feeds = feed_addresses
        .into_iter()
        .zip(feeds)
        .filter_map(|(address, feed)| feed.map(|feed| (address, feed)))
        .collect();

    Ok(PriceMarketState {
        markets: markets.iter().map(|m| (m.account.id, m.clone())).collect(),
        price_feeds,
    })
}

/// Re-fetch the accounts of `previous`, dropping the ones that no longer exist.
async fn refetch_accounts<F: AccountFetcher + ?Sized>(
    fetcher: &F,
    previous: Option<&AtRiskSet>,
) -> Result<AtRiskSet> {
    let Some(previous) = previous.filter(|p| !p.is_empty()) else {
        return Ok(Vec::new());
    };

    let addresses: Vec<Address> = previous.iter().map(|a| a.address).collect();
    Ok(fetcher
        .get_margin_accounts(&addresses)
        .await
        .context("failed to fetch at-risk margin accounts")?
        .into_iter()
        .flatten()
        .collect())
}
