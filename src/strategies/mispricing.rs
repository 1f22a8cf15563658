//! Mispricing detection from orderbook depth imbalance.
//!
//! Hypothesis: significant depth imbalance indicates informed flow and
//! predicts short-term direction. Only trades tight-spread, sufficiently
//! traded markets where the imbalance is clear.

use serde_json::json;

use crate::backtest::metrics_from_trades;
use crate::models::market::ContractFeatures;
use crate::models::{BacktestResult, Contract, MarketSnapshot, OrderSide, StrategySignal};
use crate::strategies::Strategy;

pub struct MispricingStrategy {
    /// Minimum |depth imbalance| to act on
    pub min_depth_imbalance: f64,
    pub max_spread_cents: i64,
    pub min_volume: i64,
    /// Scales raw imbalance into confidence
    pub confidence_scale: f64,
}

impl Default for MispricingStrategy {
    fn default() -> Self {
        Self {
            min_depth_imbalance: 0.30,
            max_spread_cents: 5,
            min_volume: 100,
            confidence_scale: 0.5,
        }
    }
}

impl Strategy for MispricingStrategy {
    fn name(&self) -> &str {
        "mispricing_v1"
    }

    fn description(&self) -> String {
        "Detects mispriced markets from orderbook depth imbalance. Buys YES when bid depth \
         dominates (bullish flow), NO when ask depth dominates."
            .to_string()
    }

    fn evaluate(
        &self,
        contract: &Contract,
        features: &ContractFeatures,
        _history: &[MarketSnapshot],
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
            Some(spread) => {
                return no_trade(&format!(
                    "Spread too wide: {}c > {}c",
                    spread, self.max_spread_cents
                ))
            }
            None => return no_trade("No spread"),
        };

        if features.volume_24h < self.min_volume {
            return no_trade(&format!(
                "Volume too low: {} < {}",
                features.volume_24h, self.min_volume
            ));
        }

        let imbalance = features.depth_imbalance;
        if imbalance.abs() < self.min_depth_imbalance {
            return no_trade(&format!("Depth imbalance too small: {:.2}", imbalance));
        }

        let mid = match features.mid_price {
            Some(mid) => mid,
            None => return no_trade("Cannot calculate mid price"),
        };

        // More bids than asks pushes fair value up, capped at a 10% shift.
        let adjustment = imbalance * 0.1;
        let market_prob = mid / 100.0;
        let fair_prob = (market_prob + adjustment).clamp(0.05, 0.95);
        let edge = fair_prob - market_prob;

        let (side, edge, entry_price) = if edge > 0.02 {
            (OrderSide::Yes, edge, mid as i64 + 1)
        } else if edge < -0.02 {
            (OrderSide::No, -edge, 100 - mid as i64 + 1)
        } else {
            return no_trade(&format!("Edge too small: {:.3}", edge.abs()));
        };

        let mut confidence = (imbalance.abs() * self.confidence_scale).min(0.9);
        confidence *= (self.max_spread_cents - spread + 1) as f64 / self.max_spread_cents as f64;

        // EV for a binary contract: win pays (100 - entry), loss costs entry.
        let prob_win = match side {
            OrderSide::Yes => fair_prob,
            OrderSide::No => 1.0 - fair_prob,
        };
        let payout = (100 - entry_price) as f64 / 100.0;
        let cost = entry_price as f64 / 100.0;
        let expected_value = prob_win * payout - (1.0 - prob_win) * cost;

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
                "depth_imbalance": imbalance,
                "spread": spread,
                "mid_price": mid,
                "adjustment": adjustment,
            }),
            reasoning: format!(
                "Depth imbalance {:.2} suggests {} (fair: {:.1}% vs market: {:.1}%)",
                imbalance,
                if side == OrderSide::Yes { "undervalued" } else { "overvalued" },
                fair_prob * 100.0,
                market_prob * 100.0
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
        if snapshots.len() < 10 {
            return BacktestResult::insufficient_data(self.name(), ticker, snapshots.len());
        }

        let mut pnls = Vec::new();
        for window in snapshots.windows(2) {
            let snap = &window[0];
            let next = &window[1];

            match snap.spread {
                Some(spread) if spread <= self.max_spread_cents => {}
                _ => continue,
            }
            if snap.volume_24h < self.min_volume {
                continue;
            }
            if snap.depth_imbalance.abs() < self.min_depth_imbalance {
                continue;
            }

            let entry = snap.mark();
            let exit = next.mark();
            let pnl = if snap.depth_imbalance > 0.0 {
                (exit - entry) / 100.0
            } else {
                (entry - exit) / 100.0
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

    fn contract(bid_depth: i64, ask_depth: i64, bid: i64, ask: i64, volume: i64) -> Contract {
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
                yes_bids: vec![OrderBookLevel { price: bid, quantity: bid_depth }],
                yes_asks: vec![OrderBookLevel { price: ask, quantity: ask_depth }],
                timestamp: Utc::now(),
            }),
        }
    }

    fn evaluate(contract: &Contract) -> StrategySignal {
        let strategy = MispricingStrategy::default();
        let features = contract.to_features();
        strategy.evaluate(contract, &features, &[])
    }

    #[test]
    fn test_strong_bid_imbalance_buys_yes() {
        // 400 vs 100 -> imbalance 0.6, fair = mid/100 + 0.06
        let c = contract(400, 100, 49, 51, 300);
        let signal = evaluate(&c);
        assert_eq!(signal.side, Some(OrderSide::Yes));
        assert!(signal.edge >= 0.02);
        assert_eq!(signal.entry_price, Some(51));
        assert!(signal.confidence > 0.0);
        assert!(signal.expected_value > 0.0);
    }

    #[test]
    fn test_strong_ask_imbalance_buys_no() {
        let c = contract(100, 400, 49, 51, 300);
        let signal = evaluate(&c);
        assert_eq!(signal.side, Some(OrderSide::No));
        assert_eq!(signal.entry_price, Some(51));
    }

    #[test]
    fn test_balanced_book_no_trade() {
        let c = contract(200, 200, 49, 51, 300);
        let signal = evaluate(&c);
        assert!(signal.side.is_none());
        assert!(signal.reasoning.contains("imbalance too small"));
    }

    #[test]
    fn test_wide_spread_rejected() {
        let c = contract(400, 100, 40, 60, 300);
        let signal = evaluate(&c);
        assert!(signal.side.is_none());
        assert!(signal.reasoning.contains("Spread too wide"));
    }

    #[test]
    fn test_low_volume_rejected() {
        let c = contract(400, 100, 49, 51, 10);
        let signal = evaluate(&c);
        assert!(signal.side.is_none());
        assert!(signal.reasoning.contains("Volume too low"));
    }

    #[test]
    fn test_backtest_produces_trades() {
        let now = Utc::now();
        let snapshots: Vec<MarketSnapshot> = (0..20)
            .map(|i| MarketSnapshot {
                ticker: "TEST-1".into(),
                timestamp: now - Duration::minutes((20 - i) * 5),
                last_price: 50,
                bid: Some(49),
                ask: Some(51),
                // Price drifts up while bids dominate
                mid: Some(50.0 + i as f64 * 0.5),
                spread: Some(2),
                volume_24h: 300,
                bid_depth: 400,
                ask_depth: 100,
                depth_imbalance: 0.6,
                orderbook_json: None,
            })
            .collect();

        let strategy = MispricingStrategy::default();
        let result = strategy.backtest(&snapshots, None);
        assert!(result.is_valid);
        assert_eq!(result.num_trades, 19);
        // Rising tape with positive imbalance: every trade wins
        assert!((result.win_rate - 1.0).abs() < 1e-9);
        assert!(result.total_return > 0.0);
    }

    #[test]
    fn test_backtest_insufficient_data() {
        let strategy = MispricingStrategy::default();
        let result = strategy.backtest(&[], None);
        assert!(!result.is_valid);
    }
}
