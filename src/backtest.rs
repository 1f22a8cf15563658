//! Backtesting harness: single-pass evaluation plus walk-forward
//! cross-validation over sequential folds to avoid look-ahead bias.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::config::Config;
use crate::models::{BacktestResult, MarketSnapshot};
use crate::strategies::Strategy;

/// Aggregate results from a walk-forward run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardResult {
    pub strategy_name: String,
    pub ticker: String,

    pub total_trades: usize,
    pub overall_win_rate: f64,
    pub overall_return: f64,
    pub avg_fold_sharpe: f64,
    pub max_drawdown: f64,

    pub fold_results: Vec<BacktestResult>,

    pub is_valid: bool,
    pub meets_thresholds: bool,
    pub failure_reason: Option<String>,
}

impl WalkForwardResult {
    fn invalid(strategy_name: &str, ticker: &str, reason: &str) -> Self {
        Self {
            strategy_name: strategy_name.to_string(),
            ticker: ticker.to_string(),
            total_trades: 0,
            overall_win_rate: 0.0,
            overall_return: 0.0,
            avg_fold_sharpe: 0.0,
            max_drawdown: 0.0,
            fold_results: Vec::new(),
            is_valid: false,
            meets_thresholds: false,
            failure_reason: Some(reason.to_string()),
        }
    }
}

pub struct BacktestHarness {
    pub min_train_samples: usize,
    pub min_test_samples: usize,

    // Gate thresholds
    pub min_win_rate: f64,
    pub min_backtest_samples: i64,
    pub max_drawdown_percent: f64,
}

impl Default for BacktestHarness {
    fn default() -> Self {
        Self {
            min_train_samples: 20,
            min_test_samples: 10,
            min_win_rate: 0.70,
            min_backtest_samples: 30,
            max_drawdown_percent: 0.20,
        }
    }
}

impl BacktestHarness {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_win_rate: config.min_win_rate,
            min_backtest_samples: config.min_backtest_samples,
            max_drawdown_percent: config.max_drawdown_percent,
            ..Self::default()
        }
    }

    /// Single-pass backtest: the strategy's own evaluation over the series.
    pub fn backtest_strategy(
        &self,
        strategy: &dyn Strategy,
        snapshots: &[MarketSnapshot],
        settlement_price: Option<i64>,
    ) -> BacktestResult {
        if (snapshots.len() as i64) < self.min_backtest_samples {
            let ticker = snapshots
                .first()
                .map(|s| s.ticker.as_str())
                .unwrap_or("unknown");
            return BacktestResult::insufficient_data(strategy.name(), ticker, snapshots.len());
        }
        strategy.backtest(snapshots, settlement_price)
    }

    /// Walk-forward backtest across `n_folds` sequential segments.
    ///
    /// Gate: aggregate trades >= min_backtest_samples AND win rate >=
    /// min_win_rate AND max drawdown <= max_drawdown_percent. A gate
    /// failure still yields `is_valid = true` with `meets_thresholds =
    /// false` and the precise failing threshold named.
    pub fn walk_forward(
        &self,
        strategy: &dyn Strategy,
        snapshots: &[MarketSnapshot],
        n_folds: usize,
    ) -> WalkForwardResult {
        let ticker = snapshots
            .first()
            .map(|s| s.ticker.clone())
            .unwrap_or_else(|| "unknown".to_string());

        if snapshots.len() < self.min_train_samples + self.min_test_samples {
            return WalkForwardResult::invalid(
                strategy.name(),
                &ticker,
                "Insufficient data for walk-forward",
            );
        }

        // Shrink the fold count when folds would drop below the minimum
        // test size; the last fold absorbs the remainder.
        let mut n_folds = n_folds.max(1);
        let mut fold_size = snapshots.len() / n_folds;
        if fold_size < self.min_test_samples {
            n_folds = (snapshots.len() / self.min_test_samples).max(1);
            fold_size = snapshots.len() / n_folds;
        }

        debug!(
            "walk-forward start: {} on {} ({} folds of ~{})",
            strategy.name(),
            ticker,
            n_folds,
            fold_size
        );

        let mut fold_results = Vec::new();
        let mut all_wins = 0usize;
        let mut all_trades = 0usize;
        let mut all_returns = Vec::new();
        let mut all_drawdowns = Vec::new();
        let mut all_sharpes = Vec::new();

        for i in 0..n_folds {
            let start = i * fold_size;
            let end = if i == n_folds - 1 {
                snapshots.len()
            } else {
                start + fold_size
            };
            let fold = &snapshots[start..end];
            if fold.len() < self.min_test_samples {
                continue;
            }

            let result = strategy.backtest(fold, None);
            if result.is_valid && result.num_trades > 0 {
                all_wins += (result.win_rate * result.num_trades as f64).round() as usize;
                all_trades += result.num_trades;
                all_returns.push(result.total_return);
                all_drawdowns.push(result.max_drawdown);
                if let Some(sharpe) = result.sharpe_ratio {
                    all_sharpes.push(sharpe);
                }
            }
            fold_results.push(result);
        }

        if all_trades == 0 {
            let mut result = WalkForwardResult::invalid(
                strategy.name(),
                &ticker,
                "No trades generated across folds",
            );
            result.fold_results = fold_results;
            return result;
        }

        let overall_win_rate = all_wins as f64 / all_trades as f64;
        let overall_return: f64 = all_returns.iter().sum();
        let avg_fold_sharpe = if all_sharpes.is_empty() {
            0.0
        } else {
            all_sharpes.iter().copied().mean()
        };
        let max_drawdown = all_drawdowns.iter().copied().fold(0.0, f64::max);

        let mut failure_reason = None;
        if all_trades < self.min_backtest_samples as usize {
            failure_reason = Some(format!(
                "Trades {} < {}",
                all_trades, self.min_backtest_samples
            ));
        } else if overall_win_rate < self.min_win_rate {
            failure_reason = Some(format!(
                "Win rate {:.1}% < {:.0}%",
                overall_win_rate * 100.0,
                self.min_win_rate * 100.0
            ));
        } else if max_drawdown > self.max_drawdown_percent {
            failure_reason = Some(format!(
                "Max drawdown {:.1}% > {:.0}%",
                max_drawdown * 100.0,
                self.max_drawdown_percent * 100.0
            ));
        }
        let meets_thresholds = failure_reason.is_none();

        info!(
            "walk-forward complete: {} on {} - {} trades, {:.1}% win rate, gate {}",
            strategy.name(),
            ticker,
            all_trades,
            overall_win_rate * 100.0,
            if meets_thresholds { "passed" } else { "failed" }
        );

        WalkForwardResult {
            strategy_name: strategy.name().to_string(),
            ticker,
            total_trades: all_trades,
            overall_win_rate,
            overall_return,
            avg_fold_sharpe,
            max_drawdown,
            fold_results,
            is_valid: true,
            meets_thresholds,
            failure_reason,
        }
    }

    /// Single-pass validation used by the runner before execution.
    /// Returns (passes, result, failure_reason).
    pub fn validate_strategy_for_market(
        &self,
        strategy: &dyn Strategy,
        snapshots: &[MarketSnapshot],
    ) -> (bool, Option<BacktestResult>, Option<String>) {
        if (snapshots.len() as i64) < self.min_backtest_samples {
            return (
                false,
                None,
                Some(format!(
                    "Insufficient samples: {} < {}",
                    snapshots.len(),
                    self.min_backtest_samples
                )),
            );
        }

        let result = self.backtest_strategy(strategy, snapshots, None);
        if !result.is_valid {
            let reason = result.reason_invalid.clone();
            return (false, Some(result), reason);
        }
        if result.num_trades < 5 {
            let reason = format!("Too few trades: {}", result.num_trades);
            return (false, Some(result), Some(reason));
        }
        if result.win_rate < self.min_win_rate {
            let reason = format!(
                "Win rate {:.1}% < {:.0}%",
                result.win_rate * 100.0,
                self.min_win_rate * 100.0
            );
            return (false, Some(result), Some(reason));
        }
        if result.max_drawdown > self.max_drawdown_percent {
            let reason = format!(
                "Max drawdown {:.1}% > {:.0}%",
                result.max_drawdown * 100.0,
                self.max_drawdown_percent * 100.0
            );
            return (false, Some(result), Some(reason));
        }
        (true, Some(result), None)
    }
}

/// Shared trade-series metrics used by strategy backtests: win rate,
/// returns, drawdown on the cumulative curve, annualized Sharpe, profit
/// factor.
pub fn metrics_from_trades(
    strategy_name: &str,
    ticker: &str,
    snapshots: &[MarketSnapshot],
    pnls: &[f64],
) -> BacktestResult {
    if pnls.is_empty() {
        return BacktestResult::insufficient_data(strategy_name, ticker, snapshots.len());
    }

    let wins = pnls.iter().filter(|&&p| p > 0.0).count();
    let losses = pnls.len() - wins;
    let win_rate = wins as f64 / pnls.len() as f64;

    let total_return: f64 = pnls.iter().sum();
    let avg_return = total_return / pnls.len() as f64;

    // Max drawdown on the cumulative P&L curve
    let mut cumulative = 0.0;
    let mut peak = 0.0f64;
    let mut max_drawdown = 0.0f64;
    for pnl in pnls {
        cumulative += pnl;
        peak = peak.max(cumulative);
        max_drawdown = max_drawdown.max(peak - cumulative);
    }

    // Annualized Sharpe assuming daily marks
    let std_dev = pnls.iter().copied().std_dev();
    let sharpe = if pnls.len() > 1 && std_dev > 0.0 {
        Some(avg_return / std_dev * (252.0f64).sqrt())
    } else {
        None
    };

    let avg_win = if wins > 0 {
        pnls.iter().filter(|&&p| p > 0.0).sum::<f64>() / wins as f64
    } else {
        0.0
    };
    let avg_loss = if losses > 0 {
        pnls.iter().filter(|&&p| p <= 0.0).sum::<f64>() / losses as f64
    } else {
        0.0
    };

    let profit_factor = if losses > 0 && avg_loss < 0.0 {
        let gross_profit = wins as f64 * avg_win;
        let gross_loss = (losses as f64 * avg_loss).abs();
        if gross_loss > 0.0 {
            Some(gross_profit / gross_loss)
        } else {
            None
        }
    } else {
        None
    };

    BacktestResult {
        strategy_name: strategy_name.to_string(),
        ticker: ticker.to_string(),
        start_date: snapshots.first().map(|s| s.timestamp),
        end_date: snapshots.last().map(|s| s.timestamp),
        num_samples: snapshots.len(),
        num_trades: pnls.len(),
        win_rate,
        total_return,
        avg_return_per_trade: avg_return,
        max_drawdown,
        sharpe_ratio: sharpe,
        avg_win,
        avg_loss,
        profit_factor,
        is_valid: true,
        reason_invalid: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    /// Strategy stub with a scripted per-fold trade outcome.
    struct ScriptedStrategy {
        trades_per_fold: usize,
        win_every: usize,
        drawdown: f64,
    }

    impl Strategy for ScriptedStrategy {
        fn name(&self) -> &str {
            "scripted"
        }

        fn description(&self) -> String {
            "test stub".to_string()
        }

        fn evaluate(
            &self,
            _contract: &crate::models::Contract,
            _features: &crate::models::market::ContractFeatures,
            _history: &[MarketSnapshot],
        ) -> crate::models::StrategySignal {
            crate::models::StrategySignal::no_trade("scripted", "T", 0.5, "stub")
        }

        fn backtest(
            &self,
            snapshots: &[MarketSnapshot],
            _settlement_price: Option<i64>,
        ) -> BacktestResult {
            let pnls: Vec<f64> = (0..self.trades_per_fold)
                .map(|i| if i % self.win_every == 0 { 0.02 } else { -0.01 })
                .collect();
            let mut result = metrics_from_trades("scripted", "T", snapshots, &pnls);
            result.max_drawdown = self.drawdown;
            result
        }
    }

    fn snapshots(count: usize) -> Vec<MarketSnapshot> {
        let now = Utc::now();
        (0..count)
            .map(|i| MarketSnapshot {
                ticker: "T".into(),
                timestamp: now - Duration::minutes((count - i) as i64 * 5),
                last_price: 50,
                bid: Some(49),
                ask: Some(51),
                mid: Some(50.0),
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
    fn test_walk_forward_gate_names_failing_threshold() {
        // S5 shape: plenty of trades but a 50% win rate against a 70% gate.
        let harness = BacktestHarness {
            min_win_rate: 0.70,
            min_backtest_samples: 30,
            max_drawdown_percent: 0.20,
            ..Default::default()
        };
        let strategy = ScriptedStrategy {
            trades_per_fold: 10,
            win_every: 2,
            drawdown: 0.08,
        };
        let result = harness.walk_forward(&strategy, &snapshots(100), 10);

        assert!(result.is_valid);
        assert!(!result.meets_thresholds);
        let reason = result.failure_reason.unwrap();
        assert!(reason.contains("Win rate"), "reason was {}", reason);
        assert!(reason.contains("70"), "reason was {}", reason);
    }

    #[test]
    fn test_walk_forward_passes_gate() {
        let harness = BacktestHarness {
            min_win_rate: 0.70,
            min_backtest_samples: 30,
            max_drawdown_percent: 0.20,
            ..Default::default()
        };
        // All winners
        let strategy = ScriptedStrategy {
            trades_per_fold: 10,
            win_every: 1,
            drawdown: 0.05,
        };
        let result = harness.walk_forward(&strategy, &snapshots(100), 5);
        assert!(result.is_valid);
        assert!(result.meets_thresholds);
        assert!(result.failure_reason.is_none());
        assert!(result.total_trades >= 30);
        assert!((result.overall_win_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_walk_forward_insufficient_data() {
        let harness = BacktestHarness::default();
        let strategy = ScriptedStrategy {
            trades_per_fold: 1,
            win_every: 1,
            drawdown: 0.0,
        };
        let result = harness.walk_forward(&strategy, &snapshots(5), 5);
        assert!(!result.is_valid);
        assert_eq!(
            result.failure_reason.as_deref(),
            Some("Insufficient data for walk-forward")
        );
    }

    #[test]
    fn test_walk_forward_sample_gate() {
        let harness = BacktestHarness {
            min_backtest_samples: 100,
            ..Default::default()
        };
        let strategy = ScriptedStrategy {
            trades_per_fold: 5,
            win_every: 1,
            drawdown: 0.0,
        };
        let result = harness.walk_forward(&strategy, &snapshots(100), 5);
        assert!(result.is_valid);
        assert!(!result.meets_thresholds);
        assert!(result.failure_reason.unwrap().starts_with("Trades"));
    }

    #[test]
    fn test_walk_forward_drawdown_gate() {
        let harness = BacktestHarness {
            max_drawdown_percent: 0.10,
            ..Default::default()
        };
        let strategy = ScriptedStrategy {
            trades_per_fold: 10,
            win_every: 1,
            drawdown: 0.35,
        };
        let result = harness.walk_forward(&strategy, &snapshots(100), 5);
        assert!(!result.meets_thresholds);
        assert!(result.failure_reason.unwrap().contains("drawdown"));
    }

    #[test]
    fn test_metrics_from_trades() {
        let snaps = snapshots(10);
        let pnls = vec![0.02, -0.01, 0.03, -0.02, 0.01];
        let result = metrics_from_trades("s", "T", &snaps, &pnls);

        assert_eq!(result.num_trades, 5);
        assert!((result.win_rate - 0.6).abs() < 1e-9);
        assert!((result.total_return - 0.03).abs() < 1e-9);
        assert!(result.sharpe_ratio.is_some());
        // Worst cumulative dip is 0.04 -> 0.02
        assert!((result.max_drawdown - 0.02).abs() < 1e-9);
        assert!(result.profit_factor.unwrap() > 1.0);
    }

    #[test]
    fn test_metrics_empty_is_insufficient() {
        let result = metrics_from_trades("s", "T", &snapshots(3), &[]);
        assert!(!result.is_valid);
    }
}
