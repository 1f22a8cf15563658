//! Alerts and aggregated opportunities produced by the scanner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a price discrepancy between the two venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Exchange YES price below the bookmaker no-vig probability
    ExchangeCheap,
    /// Exchange YES price above the bookmaker no-vig probability
    ExchangeRich,
}

impl Direction {
    pub fn as_str(&self) -> &str {
        match self {
            Direction::ExchangeCheap => "exchange_cheap",
            Direction::ExchangeRich => "exchange_rich",
        }
    }
}

/// Alert confidence tier. Boundaries: HIGH >= 0.75, MED >= 0.50.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Med,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &str {
        match self {
            Confidence::Low => "low",
            Confidence::Med => "med",
            Confidence::High => "high",
        }
    }

    pub fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            Confidence::High
        } else if score >= 0.50 {
            Confidence::Med
        } else {
            Confidence::Low
        }
    }
}

/// A triggered alert for one contract x one bookmaker x one direction.
/// Immutable once emitted; deduplication is the aggregator's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub market_key: String,
    pub direction: Direction,

    pub edge_pct: f64,
    pub edge_bps: f64,

    pub confidence: Confidence,
    pub confidence_score: f64,

    pub exchange_contract_id: String,
    pub exchange_side: String,
    /// Adjusted exchange price used for the edge, in [0, 1]
    pub exchange_price: f64,
    /// Contracts available at the exchange leg
    pub exchange_liquidity: i64,

    pub bookmaker: String,
    pub selection: String,
    pub book_p_no_vig: f64,

    #[serde(default)]
    pub notes: String,
    /// Raw snapshots of both legs for audit
    #[serde(default)]
    pub raw_snapshot_refs: serde_json::Value,

    pub exchange_data_age_seconds: f64,
    pub book_data_age_seconds: f64,
}

/// Aggregated actionable opportunity: one per (market_key, direction).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub market_key: String,
    /// e.g. "Thunder vs Rockets"
    pub game_label: String,
    pub direction: Direction,

    /// e.g. "BUY Thunder YES @ 68c"
    pub exchange_action: String,
    pub exchange_ticker: String,
    pub exchange_price_cents: i64,
    pub exchange_spread_cents: i64,
    pub exchange_liquidity: i64,

    /// Median no-vig probability across participating books
    pub book_fair_prob: f64,
    pub book_count: usize,
    /// e.g. "Draftkings +170"
    pub book_best: String,
    pub book_worst: String,

    /// Median edge, cents per share
    pub edge_cents: f64,
    pub edge_bps: f64,

    /// e.g. "Bet Thunder ML on Draftkings at -220"
    pub hedge_action: String,
    pub hedge_odds: String,

    /// Expected edge in dollars per 100 shares
    pub pnl_per_100_shares: f64,
    /// Ceiling from exchange-leg liquidity
    pub max_shares: i64,

    pub confidence: Confidence,
    /// edge_cents * sqrt(max(1, liquidity)) * (1 + ln(1 + book_count))
    pub rank_score: f64,

    pub timestamp: DateTime<Utc>,
    pub raw_alert_count: usize,
    pub exchange_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_tier_boundaries() {
        assert_eq!(Confidence::from_score(0.75), Confidence::High);
        assert_eq!(Confidence::from_score(0.74), Confidence::Med);
        assert_eq!(Confidence::from_score(0.50), Confidence::Med);
        assert_eq!(Confidence::from_score(0.49), Confidence::Low);
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::High > Confidence::Med);
        assert!(Confidence::Med > Confidence::Low);
    }
}
