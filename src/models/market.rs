//! Exchange contracts, orderbooks, and top-of-book snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Convert exchange cents (0-100) to a decimal probability (0-1).
pub fn cents_to_decimal(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Convert a decimal probability (0-1) to exchange cents (0-100).
pub fn decimal_to_cents(dec: f64) -> f64 {
    dec * 100.0
}

/// Single price level in the orderbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookLevel {
    /// Price in cents (1-99)
    pub price: i64,
    /// Number of contracts
    pub quantity: i64,
}

/// Orderbook with bids and asks for the YES side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub yes_bids: Vec<OrderBookLevel>,
    pub yes_asks: Vec<OrderBookLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    /// Best (highest) bid price for YES.
    pub fn best_bid(&self) -> Option<i64> {
        self.yes_bids.iter().map(|l| l.price).max()
    }

    /// Best (lowest) ask price for YES.
    pub fn best_ask(&self) -> Option<i64> {
        self.yes_asks.iter().map(|l| l.price).min()
    }

    /// Bid-ask spread in cents.
    pub fn spread(&self) -> Option<i64> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    /// Mid-point price in cents.
    pub fn mid_price(&self) -> Option<f64> {
        Some((self.best_bid()? + self.best_ask()?) as f64 / 2.0)
    }

    pub fn bid_depth(&self) -> i64 {
        self.yes_bids.iter().map(|l| l.quantity).sum()
    }

    pub fn ask_depth(&self) -> i64 {
        self.yes_asks.iter().map(|l| l.quantity).sum()
    }

    pub fn total_depth(&self) -> i64 {
        self.bid_depth() + self.ask_depth()
    }

    /// (bid_depth - ask_depth) / max(1, total_depth), in [-1, 1].
    pub fn depth_imbalance(&self) -> f64 {
        let total = self.total_depth().max(1);
        (self.bid_depth() - self.ask_depth()) as f64 / total as f64
    }

    /// Size available at the best bid.
    pub fn best_bid_size(&self) -> i64 {
        match self.best_bid() {
            Some(price) => self
                .yes_bids
                .iter()
                .filter(|l| l.price == price)
                .map(|l| l.quantity)
                .sum(),
            None => 0,
        }
    }

    /// Size available at the best ask.
    pub fn best_ask_size(&self) -> i64 {
        match self.best_ask() {
            Some(price) => self
                .yes_asks
                .iter()
                .filter(|l| l.price == price)
                .map(|l| l.quantity)
                .sum(),
            None => 0,
        }
    }
}

/// A binary prediction-market contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub ticker: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub event_ticker: String,
    #[serde(default)]
    pub series_ticker: String,

    /// "active", "closed", or "settled"
    #[serde(default = "default_status")]
    pub status: String,
    /// Settlement result once settled ("yes" / "no")
    pub result: Option<String>,

    pub close_time: Option<DateTime<Utc>>,
    pub expiration_time: Option<DateTime<Utc>>,

    /// Last traded price in cents
    #[serde(default = "default_last_price")]
    pub last_price: i64,
    #[serde(default)]
    pub volume: i64,
    #[serde(default)]
    pub volume_24h: i64,
    #[serde(default)]
    pub open_interest: i64,

    /// Populated separately by discovery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orderbook: Option<OrderBook>,
}

fn default_status() -> String {
    "active".to_string()
}

fn default_last_price() -> i64 {
    50
}

impl Contract {
    pub fn implied_probability(&self) -> f64 {
        cents_to_decimal(self.last_price)
    }

    /// Minutes until the market closes, negative if already past.
    pub fn minutes_until_close(&self, now: DateTime<Utc>) -> Option<i64> {
        let close = self.close_time?;
        Some((close - now).num_seconds() / 60)
    }

    /// Extract microstructure features for strategy evaluation.
    pub fn to_features(&self) -> ContractFeatures {
        let mut features = ContractFeatures {
            last_price: self.last_price,
            implied_prob: self.implied_probability(),
            volume_24h: self.volume_24h,
            open_interest: self.open_interest,
            ..Default::default()
        };
        if let Some(book) = &self.orderbook {
            features.spread = book.spread();
            features.mid_price = book.mid_price();
            features.bid_depth = book.bid_depth();
            features.ask_depth = book.ask_depth();
            features.depth_imbalance = book.depth_imbalance();
        }
        features
    }
}

/// Features extracted from a contract + orderbook for strategies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractFeatures {
    pub last_price: i64,
    pub implied_prob: f64,
    pub volume_24h: i64,
    pub open_interest: i64,
    pub spread: Option<i64>,
    pub mid_price: Option<f64>,
    pub bid_depth: i64,
    pub ask_depth: i64,
    pub depth_imbalance: f64,
}

/// Top-of-book snapshot for a contract. All prices in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopOfBook {
    pub contract_id: String,

    pub yes_bid: Option<f64>,
    pub yes_ask: Option<f64>,
    pub yes_bid_size: i64,
    pub yes_ask_size: i64,

    pub no_bid: Option<f64>,
    pub no_ask: Option<f64>,
    pub no_bid_size: i64,
    pub no_ask_size: i64,

    pub timestamp: DateTime<Utc>,
}

impl TopOfBook {
    /// Usable YES side: both prices present, bid < ask, sizes > 0.
    pub fn is_valid(&self) -> bool {
        match (self.yes_bid, self.yes_ask) {
            (Some(bid), Some(ask)) => {
                bid < ask && self.yes_bid_size > 0 && self.yes_ask_size > 0
            }
            _ => false,
        }
    }

    pub fn yes_mid(&self) -> Option<f64> {
        Some((self.yes_bid? + self.yes_ask?) / 2.0)
    }

    /// Seconds since capture.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_milliseconds() as f64 / 1000.0
    }

    /// Build a top-of-book from a cents orderbook. The NO side mirrors YES:
    /// NO ask = 1 - YES bid, NO bid = 1 - YES ask.
    pub fn from_orderbook(contract_id: &str, book: &OrderBook) -> Self {
        let yes_bid = book.best_bid().map(cents_to_decimal);
        let yes_ask = book.best_ask().map(cents_to_decimal);
        Self {
            contract_id: contract_id.to_string(),
            yes_bid,
            yes_ask,
            yes_bid_size: book.best_bid_size(),
            yes_ask_size: book.best_ask_size(),
            no_bid: yes_ask.map(|a| 1.0 - a),
            no_ask: yes_bid.map(|b| 1.0 - b),
            no_bid_size: book.best_ask_size(),
            no_ask_size: book.best_bid_size(),
            timestamp: book.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(bid: i64, bid_qty: i64, ask: i64, ask_qty: i64) -> OrderBook {
        OrderBook {
            yes_bids: vec![OrderBookLevel { price: bid, quantity: bid_qty }],
            yes_asks: vec![OrderBookLevel { price: ask, quantity: ask_qty }],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_orderbook_derived_fields() {
        let book = OrderBook {
            yes_bids: vec![
                OrderBookLevel { price: 54, quantity: 100 },
                OrderBookLevel { price: 53, quantity: 200 },
            ],
            yes_asks: vec![
                OrderBookLevel { price: 56, quantity: 100 },
                OrderBookLevel { price: 57, quantity: 200 },
            ],
            timestamp: Utc::now(),
        };
        assert_eq!(book.best_bid(), Some(54));
        assert_eq!(book.best_ask(), Some(56));
        assert_eq!(book.spread(), Some(2));
        assert_eq!(book.mid_price(), Some(55.0));
        assert_eq!(book.bid_depth(), 300);
        assert_eq!(book.ask_depth(), 300);
        assert!((book.depth_imbalance() - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_depth_imbalance_bounds() {
        let b = book(48, 300, 52, 100);
        let imb = b.depth_imbalance();
        assert!((imb - 0.5).abs() < 1e-12);

        let empty = OrderBook::default();
        assert_eq!(empty.depth_imbalance(), 0.0);
    }

    #[test]
    fn test_top_of_book_validity() {
        let tob = TopOfBook::from_orderbook("TEST-1", &book(48, 100, 52, 100));
        assert!(tob.is_valid());
        assert_eq!(tob.yes_bid, Some(0.48));
        assert_eq!(tob.yes_ask, Some(0.52));
        // NO ask mirrors 1 - YES bid
        assert!((tob.no_ask.unwrap() - 0.52).abs() < 1e-12);

        let crossed = TopOfBook::from_orderbook("TEST-2", &book(52, 100, 48, 100));
        assert!(!crossed.is_valid());

        let no_size = TopOfBook::from_orderbook("TEST-3", &book(48, 0, 52, 100));
        assert!(!no_size.is_valid());
    }
}
