//! Sportsbook odds quote models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Odds quote formats accepted from the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OddsFormat {
    /// e.g. -110, +150
    American,
    /// e.g. 1.91, 2.50
    Decimal,
}

impl OddsFormat {
    pub fn as_str(&self) -> &str {
        match self {
            OddsFormat::American => "american",
            OddsFormat::Decimal => "decimal",
        }
    }
}

/// Sportsbook market types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    /// Head-to-head (moneyline)
    H2h,
    Spreads,
    Totals,
    /// Futures
    Outrights,
}

impl MarketType {
    pub fn as_str(&self) -> &str {
        match self {
            MarketType::H2h => "h2h",
            MarketType::Spreads => "spreads",
            MarketType::Totals => "totals",
            MarketType::Outrights => "outrights",
        }
    }

    /// Parse an aggregator market key. Unknown keys return None and are
    /// skipped by the quote parser.
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "h2h" => Some(MarketType::H2h),
            "spreads" => Some(MarketType::Spreads),
            "totals" => Some(MarketType::Totals),
            "outrights" => Some(MarketType::Outrights),
            _ => None,
        }
    }
}

/// A single odds quote from one bookmaker via the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsQuote {
    /// Aggregator source (e.g. "theoddsapi")
    pub source: String,
    /// Bookmaker key (e.g. "draftkings")
    pub bookmaker: String,

    pub event_id: String,
    pub market_type: MarketType,
    /// Selection name (team, player, outcome)
    pub selection: String,

    pub odds_format: OddsFormat,
    /// Raw odds value as returned by the API
    pub odds_value: f64,
    /// Point/handicap for spreads and totals
    pub point: Option<f64>,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub event_title: String,
    #[serde(default)]
    pub sport: String,
    pub commence_time: Option<DateTime<Utc>>,
}

impl OddsQuote {
    /// Seconds since capture.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_milliseconds() as f64 / 1000.0
    }

    /// Display the raw odds preserving the source format: signed whole
    /// number for American, two decimals otherwise.
    pub fn odds_display(&self) -> String {
        match self.odds_format {
            OddsFormat::American => format!("{:+.0}", self.odds_value),
            OddsFormat::Decimal => format!("{:.2}", self.odds_value),
        }
    }
}
