//! Market discovery: find same-day expiring contracts that pass the
//! liquidity and safety filter stack.
//!
//! The "same day" check compares UTC calendar dates unconditionally;
//! operator-facing local times are presentation only.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::clients::ExchangeClient;
use crate::config::Config;
use crate::models::Contract;

const MAX_PAGES: usize = 10;
const PAGE_SIZE: usize = 100;
const INTER_PAGE_DELAY_MS: u64 = 500;
const ORDERBOOK_DELAY_MS: u64 = 300;

pub struct MarketDiscovery {
    client: Arc<dyn ExchangeClient>,
    config: Config,
}

impl MarketDiscovery {
    pub fn new(client: Arc<dyn ExchangeClient>, config: Config) -> Self {
        Self { client, config }
    }

    /// Paginate the exchange and keep contracts expiring on the reference
    /// UTC date, with orderbooks attached. Contracts without a book are
    /// dropped downstream by the filter stack.
    pub async fn find_same_day_markets(
        &self,
        reference: DateTime<Utc>,
    ) -> Result<Vec<Contract>> {
        let mut all_markets = Vec::new();
        let mut cursor: Option<String> = None;

        for page in 0..MAX_PAGES {
            let (markets, next_cursor) = self
                .client
                .get_markets(PAGE_SIZE, cursor.clone(), None)
                .await?;
            let fetched = markets.len();
            all_markets.extend(markets);
            cursor = next_cursor;

            debug!("discovery page {}: {} markets", page + 1, fetched);
            if cursor.is_none() || fetched == 0 {
                break;
            }
            sleep(Duration::from_millis(INTER_PAGE_DELAY_MS)).await;
        }

        info!("fetched {} markets", all_markets.len());

        let mut same_day = Vec::new();
        for mut market in all_markets {
            if !expires_on(&market, reference) {
                continue;
            }
            if let Some(book) = self.client.get_orderbook(&market.ticker).await? {
                market.orderbook = Some(book);
            }
            same_day.push(market);
            sleep(Duration::from_millis(ORDERBOOK_DELAY_MS)).await;
        }

        info!(
            "same-day markets: {} ({})",
            same_day.len(),
            same_day
                .iter()
                .map(|m| m.ticker.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(same_day)
    }

    /// Apply the filter stack. Returns the survivors and a tally of
    /// rejection reasons (exactly one reason per rejected contract).
    pub fn filter_markets(
        &self,
        markets: Vec<Contract>,
        reference: DateTime<Utc>,
    ) -> (Vec<Contract>, BTreeMap<&'static str, usize>) {
        let mut passed = Vec::new();
        let mut reasons: BTreeMap<&'static str, usize> = BTreeMap::new();

        for market in markets {
            match check_market(&market, reference, &self.config) {
                None => passed.push(market),
                Some(reason) => *reasons.entry(reason).or_insert(0) += 1,
            }
        }

        info!(
            "filtered markets: {} passed, {} rejected ({:?})",
            passed.len(),
            reasons.values().sum::<usize>(),
            reasons
        );
        (passed, reasons)
    }

    /// Full pipeline: find same-day candidates, then filter.
    pub async fn discover_and_filter(&self, reference: DateTime<Utc>) -> Result<Vec<Contract>> {
        let candidates = self.find_same_day_markets(reference).await?;
        let (tradeable, _) = self.filter_markets(candidates, reference);
        info!("discovery complete: {} tradeable", tradeable.len());
        Ok(tradeable)
    }
}

/// UTC calendar-date comparison of the contract expiry and the reference.
pub fn expires_on(market: &Contract, reference: DateTime<Utc>) -> bool {
    match market.expiration_time {
        Some(expiry) => expiry.date_naive() == reference.date_naive(),
        None => false,
    }
}

/// Check one contract against every filter. Returns the first failing
/// reason, or None when the contract is tradeable.
pub fn check_market(
    market: &Contract,
    reference: DateTime<Utc>,
    config: &Config,
) -> Option<&'static str> {
    let category = market.category.to_lowercase();

    if !config.category_whitelist.is_empty()
        && !config
            .category_whitelist
            .iter()
            .any(|c| category.contains(&c.to_lowercase()))
    {
        return Some("not_in_whitelist");
    }

    if config
        .category_blacklist
        .iter()
        .any(|c| category.contains(&c.to_lowercase()))
    {
        return Some("in_blacklist");
    }

    if config.market_blacklist.iter().any(|t| t == &market.ticker) {
        return Some("market_blacklisted");
    }

    if market.volume_24h < config.min_volume_24h {
        return Some("low_volume");
    }

    let book = match &market.orderbook {
        Some(book) => book,
        None => return Some("no_orderbook"),
    };

    let spread = match book.spread() {
        Some(spread) => spread,
        None => return Some("no_spread"),
    };
    if spread > config.max_spread_cents {
        return Some("spread_too_wide");
    }

    if book.total_depth() < config.min_orderbook_depth {
        return Some("low_depth");
    }

    if let Some(close) = market.close_time {
        // A contract exactly at the cutoff is excluded.
        let seconds_to_close = (close - reference).num_seconds();
        if seconds_to_close <= config.trading_cutoff_minutes * 60 {
            return Some("too_close_to_expiry");
        }
    }

    if market.status != "active" {
        return Some("not_active");
    }

    if market.result.is_some() {
        return Some("already_settled");
    }

    None
}
