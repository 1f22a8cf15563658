//! Market snapshots, strategy signals, and backtest results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::market::{Contract, OrderBook};
use crate::models::order::OrderSide;

/// One row in the snapshot store, keyed by (ticker, timestamp).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,

    /// Last traded price in cents
    pub last_price: i64,
    pub bid: Option<i64>,
    pub ask: Option<i64>,
    pub mid: Option<f64>,
    pub spread: Option<i64>,

    pub volume_24h: i64,
    pub bid_depth: i64,
    pub ask_depth: i64,
    /// (bid_depth - ask_depth) / max(1, total_depth)
    pub depth_imbalance: f64,

    /// Serialized full book, when captured
    pub orderbook_json: Option<String>,
}

impl MarketSnapshot {
    /// Capture the current top-of-book state of a contract.
    pub fn from_market(contract: &Contract, book: &OrderBook) -> Self {
        Self {
            ticker: contract.ticker.clone(),
            timestamp: Utc::now(),
            last_price: contract.last_price,
            bid: book.best_bid(),
            ask: book.best_ask(),
            mid: book.mid_price(),
            spread: book.spread(),
            volume_24h: contract.volume_24h,
            bid_depth: book.bid_depth(),
            ask_depth: book.ask_depth(),
            depth_imbalance: book.depth_imbalance(),
            orderbook_json: serde_json::to_string(book).ok(),
        }
    }

    /// Mid if present, otherwise last price. Used as the backtest mark.
    pub fn mark(&self) -> f64 {
        self.mid.unwrap_or(self.last_price as f64)
    }
}

/// A trading signal emitted by a strategy for one contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySignal {
    pub strategy_name: String,
    pub ticker: String,

    /// None means no trade
    pub side: Option<OrderSide>,
    pub confidence: f64,
    pub fair_probability: f64,
    pub market_probability: f64,
    pub edge: f64,
    pub expected_value: f64,
    /// Proposed entry price in cents
    pub entry_price: Option<i64>,

    #[serde(default)]
    pub features_used: serde_json::Value,
    #[serde(default)]
    pub reasoning: String,

    // Attached by the walk-forward validator
    pub backtest_win_rate: Option<f64>,
    pub backtest_samples: Option<i64>,
    pub backtest_sharpe: Option<f64>,
}

impl StrategySignal {
    /// A no-trade signal carrying the rejection reasoning.
    pub fn no_trade(strategy_name: &str, ticker: &str, market_prob: f64, reasoning: &str) -> Self {
        Self {
            strategy_name: strategy_name.to_string(),
            ticker: ticker.to_string(),
            side: None,
            confidence: 0.0,
            fair_probability: market_prob,
            market_probability: market_prob,
            edge: 0.0,
            expected_value: 0.0,
            entry_price: None,
            features_used: serde_json::Value::Null,
            reasoning: reasoning.to_string(),
            backtest_win_rate: None,
            backtest_samples: None,
            backtest_sharpe: None,
        }
    }

    pub fn is_tradeable(&self) -> bool {
        self.side.is_some()
    }

    pub fn meets_thresholds(
        &self,
        min_confidence: f64,
        min_ev: f64,
        min_win_rate: f64,
        min_samples: i64,
    ) -> bool {
        if self.confidence < min_confidence || self.expected_value < min_ev {
            return false;
        }
        if let Some(wr) = self.backtest_win_rate {
            if wr < min_win_rate {
                return false;
            }
        }
        if let Some(samples) = self.backtest_samples {
            if samples < min_samples {
                return false;
            }
        }
        true
    }
}

/// Performance metrics from a single-pass backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy_name: String,
    pub ticker: String,

    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,

    pub num_samples: usize,
    pub num_trades: usize,
    pub win_rate: f64,
    pub total_return: f64,
    pub avg_return_per_trade: f64,
    pub max_drawdown: f64,
    /// Annualized: sqrt(252) * mean / stdev of per-trade returns
    pub sharpe_ratio: Option<f64>,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: Option<f64>,

    pub is_valid: bool,
    pub reason_invalid: Option<String>,
}

impl BacktestResult {
    /// Result for a market without enough history to evaluate.
    pub fn insufficient_data(strategy_name: &str, ticker: &str, num_samples: usize) -> Self {
        Self {
            strategy_name: strategy_name.to_string(),
            ticker: ticker.to_string(),
            start_date: None,
            end_date: None,
            num_samples,
            num_trades: 0,
            win_rate: 0.0,
            total_return: 0.0,
            avg_return_per_trade: 0.0,
            max_drawdown: 0.0,
            sharpe_ratio: None,
            avg_win: 0.0,
            avg_loss: 0.0,
            profit_factor: None,
            is_valid: false,
            reason_invalid: Some(format!("Insufficient data: {} samples", num_samples)),
        }
    }
}
