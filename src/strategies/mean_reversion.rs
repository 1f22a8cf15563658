//! Short-horizon mean reversion for liquid same-day markets.
//!
//! Tracks a moving average of the mid over recent snapshots and fades
//! deviations with limit orders, expecting reversion toward the mean.
//! Fair probability is the moving average read as a probability; a richer
//! fair model is a deliberate non-feature for now.

use serde_json::json;

use crate::backtest::metrics_from_trades;
use crate::models::market::ContractFeatures;
use crate::models::{BacktestResult, Contract, MarketSnapshot, OrderSide, StrategySignal};
use crate::strategies::Strategy;

/// Baseline probability that a stretched price reverts by the next mark.
const REVERSION_PROBABILITY: f64 = 0.6;

pub struct MeanReversionStrategy {
    /// Snapshots in the moving average
    pub lookback_periods: usize,
    /// Minimum |deviation| from the MA, as a fraction
    pub deviation_threshold: f64,
    pub max_spread_cents: i64,
    pub min_volume: i64,
    pub min_depth: i64,
}

impl Default for MeanReversionStrategy {
    fn default() -> Self {
        Self {
            lookback_periods: 6,
            deviation_threshold: 0.03,
            max_spread_cents: 4,
            min_volume: 200,
            min_depth: 100,
        }
    }
}

impl MeanReversionStrategy {
    fn moving_average(prices: &[f64]) -> f64 {
        prices.iter().sum::<f64>() / prices.len() as f64
    }
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &str {
        "mean_reversion_v1"
    }

    fn description(&self) -> String {
        format!(
            "Mean reversion on deviations >{:.0}% from the short-term moving average. \
             Posts limit orders betting on reversion.",
            self.deviation_threshold * 100.0
        )
    }

    fn evaluate(
        &self,
        contract: &Contract,
        features: &ContractFeatures,
        history: &[MarketSnapshot],
    ) -> StrategySignal {
        let market_prob = contract.implied_probability();
        let no_trade = |reason: &str| {
            StrategySignal::no_trade(self.name(), &contract.ticker, market_prob, reason)
        };

        if contract.orderbook.is_none() {
            return no_trade("No orderbook data");
        }

        let spread = match features.spread {
            Some(spread) if spread <= self.max_spread_cents => spread,
            Some(spread) => return no_trade(&format!("Spread too wide: {}c", spread)),
            None => return no_trade("No spread"),
        };

        if features.volume_24h < self.min_volume {
            return no_trade(&format!("Volume too low: {}", features.volume_24h));
        }

        let total_depth = features.bid_depth + features.ask_depth;
        if total_depth < self.min_depth {
            return no_trade(&format!("Depth too low: {}", total_depth));
        }

        let mid = match features.mid_price {
            Some(mid) => mid,
            None => return no_trade("Cannot calculate mid price"),
        };

        if history.len() < self.lookback_periods {
            return no_trade(&format!(
                "Insufficient history: need {} snapshots, have {}",
                self.lookback_periods,
                history.len()
            ));
        }

        let recent: Vec<f64> = history[history.len() - self.lookback_periods..]
            .iter()
            .map(|s| s.mark())
            .collect();
        let ma = Self::moving_average(&recent);
        if ma <= 0.0 {
            return no_trade("Degenerate moving average");
        }

        let deviation = (mid - ma) / ma;
        if deviation.abs() < self.deviation_threshold {
            return no_trade(&format!(
                "Deviation {:.2}% below threshold {:.0}%",
                deviation * 100.0,
                self.deviation_threshold * 100.0
            ));
        }

        // Fade the deviation: above the MA means reversion down (buy NO),
        // below means reversion up (buy YES). Entry sits one cent inside
        // mid against the fade direction.
        let fair_prob = ma / 100.0;
        let (side, entry_price) = if deviation > 0.0 {
            (OrderSide::No, 100 - mid as i64 + 1)
        } else {
            (OrderSide::Yes, mid as i64 - 1)
        };

        let market_prob = mid / 100.0;
        let edge = (fair_prob - market_prob).abs();

        let deviation_factor = (deviation.abs() / self.deviation_threshold).min(2.0) / 2.0;
        let liquidity_factor = (features.volume_24h as f64 / 500.0).min(1.0);
        let confidence = deviation_factor * liquidity_factor * 0.7;

        let expected_move = (mid - ma).abs();
        let expected_value = (REVERSION_PROBABILITY * expected_move
            - (1.0 - REVERSION_PROBABILITY) * expected_move)
            / 100.0;

        StrategySignal {
            strategy_name: self.name().to_string(),
            ticker: contract.ticker.clone(),
            side: Some(side),
            confidence,
            fair_probability: fair_prob,
            market_probability: market_prob,
            edge,
            expected_value,
            entry_price: Some(entry_price),
            features_used: json!({
                "mid_price": mid,
                "ma": ma,
                "deviation": deviation,
                "spread": spread,
                "volume_24h": features.volume_24h,
            }),
            reasoning: format!(
                "Price {:.0}c deviates {:.1}% from MA {:.0}c. Expect reversion toward {:.0}c.",
                mid,
                deviation * 100.0,
                ma,
                ma
            ),
            backtest_win_rate: None,
            backtest_samples: None,
            backtest_sharpe: None,
        }
    }

    fn backtest(
        &self,
        snapshots: &[MarketSnapshot],
        _settlement_price: Option<i64>,
    ) -> BacktestResult {
        let ticker = snapshots
            .first()
            .map(|s| s.ticker.as_str())
            .unwrap_or("unknown");
        if snapshots.len() < self.lookback_periods + 5 {
            return BacktestResult::insufficient_data(self.name(), ticker, snapshots.len());
        }

        let mut pnls = Vec::new();
        for i in self.lookback_periods..snapshots.len() - 1 {
            let snap = &snapshots[i];

            if let Some(spread) = snap.spread {
                if spread > self.max_spread_cents {
                    continue;
                }
            }
            if snap.volume_24h < self.min_volume {
                continue;
            }

            let lookback: Vec<f64> = snapshots[i - self.lookback_periods..i]
                .iter()
                .map(|s| s.mark())
                .collect();
            let ma = Self::moving_average(&lookback);
            if ma <= 0.0 {
                continue;
            }

            let current = snap.mark();
            let deviation = (current - ma) / ma;
            if deviation.abs() < self.deviation_threshold {
                continue;
            }

            let exit = snapshots[i + 1].mark();
            // Fading: price above MA shorts YES, below goes long
            let pnl = if deviation > 0.0 {
                (current - exit) / 100.0
            } else {
                (exit - current) / 100.0
            };
            pnls.push(pnl);
        }

        metrics_from_trades(self.name(), ticker, snapshots, &pnls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderBook, OrderBookLevel};
    use chrono::{Duration, Utc};

    fn contract(bid: i64, ask: i64, volume: i64) -> Contract {
        Contract {
            ticker: "TEST-1".into(),
            title: "Test".into(),
            subtitle: String::new(),
            category: "test".into(),
            event_ticker: String::new(),
            series_ticker: String::new(),
            status: "active".into(),
            result: None,
            close_time: None,
            expiration_time: None,
            last_price: (bid + ask) / 2,
            volume: volume * 10,
            volume_24h: volume,
            open_interest: 100,
            orderbook: Some(OrderBook {
                yes_bids: vec![OrderBookLevel { price: bid, quantity: 100 }],
                yes_asks: vec![OrderBookLevel { price: ask, quantity: 100 }],
                timestamp: Utc::now(),
            }),
        }
    }

    fn history(marks: &[f64]) -> Vec<MarketSnapshot> {
        let now = Utc::now();
        marks
            .iter()
            .enumerate()
            .map(|(i, &mark)| MarketSnapshot {
                ticker: "TEST-1".into(),
                timestamp: now - Duration::minutes((marks.len() - i) as i64 * 5),
                last_price: mark as i64,
                bid: Some(mark as i64 - 1),
                ask: Some(mark as i64 + 1),
                mid: Some(mark),
                spread: Some(2),
                volume_24h: 300,
                bid_depth: 100,
                ask_depth: 100,
                depth_imbalance: 0.0,
                orderbook_json: None,
            })
            .collect()
    }

    #[test]
    fn test_price_above_ma_fades_with_no() {
        // MA of the lookback is 50; mid 55 deviates +10%
        let c = contract(54, 56, 300);
        let hist = history(&[50.0; 6]);
        let strategy = MeanReversionStrategy::default();
        let signal = strategy.evaluate(&c, &c.to_features(), &hist);

        assert_eq!(signal.side, Some(OrderSide::No));
        assert!((signal.fair_probability - 0.50).abs() < 1e-9);
        assert_eq!(signal.entry_price, Some(100 - 55 + 1));
        assert!(signal.confidence > 0.0);
        assert!(signal.expected_value > 0.0);
    }

    #[test]
    fn test_price_below_ma_buys_yes() {
        let c = contract(44, 46, 300);
        let hist = history(&[50.0; 6]);
        let strategy = MeanReversionStrategy::default();
        let signal = strategy.evaluate(&c, &c.to_features(), &hist);

        assert_eq!(signal.side, Some(OrderSide::Yes));
        assert_eq!(signal.entry_price, Some(45 - 1));
    }

    #[test]
    fn test_small_deviation_no_trade() {
        let c = contract(49, 51, 300);
        let hist = history(&[50.0; 6]);
        let strategy = MeanReversionStrategy::default();
        let signal = strategy.evaluate(&c, &c.to_features(), &hist);
        assert!(signal.side.is_none());
        assert!(signal.reasoning.contains("below threshold"));
    }

    #[test]
    fn test_insufficient_history_no_trade() {
        let c = contract(44, 46, 300);
        let hist = history(&[50.0; 3]);
        let strategy = MeanReversionStrategy::default();
        let signal = strategy.evaluate(&c, &c.to_features(), &hist);
        assert!(signal.side.is_none());
        assert!(signal.reasoning.contains("Insufficient history"));
    }

    #[test]
    fn test_thin_book_no_trade() {
        let mut c = contract(44, 46, 300);
        c.orderbook = Some(OrderBook {
            yes_bids: vec![OrderBookLevel { price: 44, quantity: 20 }],
            yes_asks: vec![OrderBookLevel { price: 46, quantity: 20 }],
            timestamp: Utc::now(),
        });
        let strategy = MeanReversionStrategy::default();
        let signal = strategy.evaluate(&c, &c.to_features(), &history(&[50.0; 6]));
        assert!(signal.side.is_none());
        assert!(signal.reasoning.contains("Depth too low"));
    }

    #[test]
    fn test_backtest_fades_spikes() {
        // Flat tape at 50 with periodic spikes to 56 that revert
        let mut marks = Vec::new();
        for i in 0..40 {
            marks.push(if i % 8 == 7 { 56.0 } else { 50.0 });
        }
        let snapshots = history(&marks);
        let strategy = MeanReversionStrategy::default();
        let result = strategy.backtest(&snapshots, None);

        assert!(result.is_valid);
        assert!(result.num_trades > 0);
        // Every spike reverts to 50 on the next mark
        assert!((result.win_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_backtest_insufficient_data() {
        let strategy = MeanReversionStrategy::default();
        let result = strategy.backtest(&history(&[50.0; 5]), None);
        assert!(!result.is_valid);
    }
}
