//! Risk management: all pre-trade limits, fractional-Kelly sizing, the
//! idempotency-key set, and fill/P&L accounting for one trading day.
//!
//! The risk gate is the only mutable in-process state of a cycle. It is
//! owned by the runner and reset at cycle start, never shared across
//! cycles.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::config::Config;
use crate::models::{DailyPnl, Order, OrderSide, Position, StrategySignal};

/// Result of a pre-trade check.
#[derive(Debug, Clone)]
pub struct RiskCheck {
    pub passed: bool,
    pub reason: Option<String>,
    /// Maximum allowed position size in contracts
    pub allowed_contracts: Option<i64>,
}

impl RiskCheck {
    fn pass(allowed_contracts: i64) -> Self {
        Self {
            passed: true,
            reason: None,
            allowed_contracts: Some(allowed_contracts),
        }
    }

    fn fail(reason: String) -> Self {
        Self {
            passed: false,
            reason: Some(reason),
            allowed_contracts: None,
        }
    }
}

/// Mutable daily risk state.
#[derive(Debug, Default)]
pub struct RiskState {
    pub date: Option<NaiveDate>,

    pub trades_today: usize,
    pub daily_realized_pnl: f64,
    pub daily_unrealized_pnl: f64,

    pub open_positions: HashMap<String, Position>,
    pub total_exposure: f64,
    pub pending_order_exposure: f64,
    pub peak_exposure: f64,

    pub trades_filled: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub fees_paid: f64,
    pub markets_traded: HashSet<String>,
}

impl RiskState {
    pub fn daily_total_pnl(&self) -> f64 {
        self.daily_realized_pnl + self.daily_unrealized_pnl
    }
}

pub struct RiskManager {
    config: Config,
    pub state: RiskState,
    idempotency_keys: HashSet<String>,
}

impl RiskManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: RiskState::default(),
            idempotency_keys: HashSet::new(),
        }
    }

    /// Reset daily tracking. Called at the start of each trading day.
    pub fn reset_daily_state(&mut self) {
        self.state = RiskState {
            date: Some(Utc::now().date_naive()),
            ..Default::default()
        };
        self.idempotency_keys.clear();
        info!("risk state reset");
    }

    /// Run every pre-trade check in order; the first failure wins.
    pub fn check_order(&self, signal: &StrategySignal, proposed_dollars: f64) -> RiskCheck {
        if self.state.daily_total_pnl() < -self.config.max_daily_loss_dollars {
            return RiskCheck::fail(format!(
                "Daily loss limit breached: ${:.2}",
                self.state.daily_total_pnl()
            ));
        }

        if self.state.trades_today >= self.config.max_trades_per_day {
            return RiskCheck::fail(format!("Max trades reached: {}", self.state.trades_today));
        }

        if self.state.open_positions.len() >= self.config.max_open_positions {
            return RiskCheck::fail(format!(
                "Max positions reached: {}",
                self.state.open_positions.len()
            ));
        }

        let new_total =
            self.state.total_exposure + self.state.pending_order_exposure + proposed_dollars;
        if new_total > self.config.max_total_exposure_dollars {
            return RiskCheck::fail(format!(
                "Total exposure limit: ${:.2} > ${:.2}",
                new_total, self.config.max_total_exposure_dollars
            ));
        }

        let existing = self
            .state
            .open_positions
            .get(&signal.ticker)
            .map(|p| p.cost_basis())
            .unwrap_or(0.0);
        if existing + proposed_dollars > self.config.max_per_market_exposure_dollars {
            return RiskCheck::fail(format!(
                "Market exposure limit: ${:.2} > ${:.2}",
                existing + proposed_dollars,
                self.config.max_per_market_exposure_dollars
            ));
        }

        if signal.expected_value < self.config.min_expected_value {
            return RiskCheck::fail(format!(
                "EV too low: {:.3} < {:.3}",
                signal.expected_value, self.config.min_expected_value
            ));
        }

        if signal.confidence < self.config.confidence_threshold {
            return RiskCheck::fail(format!(
                "Confidence too low: {:.2} < {:.2}",
                signal.confidence, self.config.confidence_threshold
            ));
        }

        if let Some(win_rate) = signal.backtest_win_rate {
            if win_rate < self.config.min_win_rate {
                return RiskCheck::fail(format!(
                    "Backtest win rate too low: {:.1}%",
                    win_rate * 100.0
                ));
            }
        }
        if let Some(samples) = signal.backtest_samples {
            if samples < self.config.min_backtest_samples {
                return RiskCheck::fail(format!("Insufficient backtest samples: {}", samples));
            }
        }

        RiskCheck::pass(self.calculate_allowed_contracts(signal, proposed_dollars))
    }

    /// Position size in contracts. Fractional Kelly when enabled, capped by
    /// the proposal, the per-market cap, and remaining total headroom.
    fn calculate_allowed_contracts(&self, signal: &StrategySignal, proposed: f64) -> i64 {
        let entry_price = signal.entry_price.unwrap_or(50).clamp(1, 99);

        let max_dollars = if self.config.use_kelly_sizing && signal.expected_value > 0.0 {
            // f = (p*b - q) / b for payout multiple b = (100 - e) / e
            let b = (100 - entry_price) as f64 / entry_price as f64;
            let p = match signal.side {
                Some(OrderSide::No) => 1.0 - signal.fair_probability,
                _ => signal.fair_probability,
            };
            let q = 1.0 - p;

            let kelly_dollars = if b > 0.0 {
                let kelly = ((p * b - q) / b).max(0.0) * self.config.kelly_fraction;
                kelly * self.config.max_total_exposure_dollars
            } else {
                0.0
            };

            proposed
                .min(kelly_dollars)
                .min(self.config.max_per_market_exposure_dollars)
                .min(self.config.max_total_exposure_dollars - self.state.total_exposure)
        } else {
            proposed
                .min(self.config.default_position_size_dollars)
                .min(self.config.max_per_market_exposure_dollars)
        };

        let contracts = (max_dollars * 100.0 / entry_price as f64) as i64;
        contracts.max(1)
    }

    /// True when the key is fresh and an order may proceed.
    pub fn check_idempotency(&self, key: &str) -> bool {
        if self.idempotency_keys.contains(key) {
            warn!("duplicate order blocked: {}", key);
            return false;
        }
        true
    }

    /// Record a submission: spends the idempotency key, counts the trade,
    /// and adds pending exposure.
    pub fn record_order_submitted(&mut self, order: &Order) {
        self.idempotency_keys.insert(order.idempotency_key.clone());
        self.state.trades_today += 1;
        self.state.pending_order_exposure += order.notional_value();
        self.state.markets_traded.insert(order.ticker.clone());
        self.track_peak();

        info!(
            "order recorded: {} (trades today {}, pending ${:.2})",
            order.ticker, self.state.trades_today, self.state.pending_order_exposure
        );
    }

    /// Record a fill: releases pending exposure (clamped at zero) and
    /// updates the position book.
    pub fn record_fill(&mut self, order: &Order) {
        self.state.pending_order_exposure =
            (self.state.pending_order_exposure - order.notional_value()).max(0.0);
        self.state.trades_filled += 1;

        let entry = order.average_fill_price.unwrap_or(order.price as f64);
        match self.state.open_positions.get_mut(&order.ticker) {
            Some(position) => position.add_quantity(order.filled_quantity, entry),
            None => {
                self.state.open_positions.insert(
                    order.ticker.clone(),
                    Position::new(&order.ticker, order.side, order.filled_quantity, entry),
                );
            }
        }

        self.recalculate_exposure();
        info!(
            "fill recorded: {} x{} (total exposure ${:.2})",
            order.ticker, order.filled_quantity, self.state.total_exposure
        );
    }

    /// Record realized P&L from a closed position and evict the ticker.
    pub fn record_pnl(&mut self, ticker: &str, realized_pnl: f64) {
        self.state.daily_realized_pnl += realized_pnl;
        if realized_pnl > 0.0 {
            self.state.trades_won += 1;
        } else {
            self.state.trades_lost += 1;
        }
        self.state.open_positions.remove(ticker);
        self.recalculate_exposure();

        info!(
            "pnl recorded: {} {:+.2} (daily total {:.2})",
            ticker,
            realized_pnl,
            self.state.daily_total_pnl()
        );
    }

    /// Recompute unrealized P&L from current marks.
    pub fn update_unrealized_pnl(&mut self) {
        self.state.daily_unrealized_pnl = self
            .state
            .open_positions
            .values()
            .filter_map(|p| p.unrealized_pnl())
            .sum();
    }

    /// Update a position's mark.
    pub fn mark_position(&mut self, ticker: &str, price: i64) {
        if let Some(position) = self.state.open_positions.get_mut(ticker) {
            position.update_price(price);
        }
    }

    fn recalculate_exposure(&mut self) {
        self.state.total_exposure = self
            .state
            .open_positions
            .values()
            .map(|p| p.cost_basis())
            .sum();
        self.track_peak();
    }

    fn track_peak(&mut self) {
        let at_risk = self.state.total_exposure + self.state.pending_order_exposure;
        if at_risk > self.state.peak_exposure {
            self.state.peak_exposure = at_risk;
        }
    }

    /// End-of-day summary for persistence and reporting.
    pub fn daily_summary(&self) -> DailyPnl {
        let mut pnl = DailyPnl::new(self.state.date.unwrap_or_else(|| Utc::now().date_naive()));
        pnl.realized_pnl = self.state.daily_realized_pnl;
        pnl.unrealized_pnl = self.state.daily_unrealized_pnl;
        pnl.fees = self.state.fees_paid;
        pnl.trades_placed = self.state.trades_today as i64;
        pnl.trades_filled = self.state.trades_filled as i64;
        pnl.trades_won = self.state.trades_won as i64;
        pnl.trades_lost = self.state.trades_lost as i64;
        pnl.peak_exposure = self.state.peak_exposure;
        pnl.ending_exposure = self.state.total_exposure;
        let mut markets: Vec<String> = self.state.markets_traded.iter().cloned().collect();
        markets.sort();
        pnl.markets_traded = markets;
        pnl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderType;

    fn config() -> Config {
        Config::default()
    }

    fn signal(ticker: &str, side: OrderSide) -> StrategySignal {
        let mut signal = StrategySignal::no_trade("mispricing_v1", ticker, 0.5, "");
        signal.side = Some(side);
        signal.confidence = 0.8;
        signal.fair_probability = 0.6;
        signal.market_probability = 0.5;
        signal.edge = 0.1;
        signal.expected_value = 0.05;
        signal.entry_price = Some(50);
        signal
    }

    fn order(ticker: &str, key: &str, price: i64, quantity: i64) -> Order {
        let mut order = Order::new(ticker, OrderSide::Yes, OrderType::Limit, price, quantity);
        order.idempotency_key = key.to_string();
        order.filled_quantity = quantity;
        order.average_fill_price = Some(price as f64);
        order
    }

    #[test]
    fn test_check_order_passes_good_signal() {
        let mut manager = RiskManager::new(config());
        manager.reset_daily_state();
        let check = manager.check_order(&signal("TEST-1", OrderSide::Yes), 10.0);
        assert!(check.passed, "failed: {:?}", check.reason);
        assert!(check.allowed_contracts.unwrap() >= 1);
    }

    #[test]
    fn test_daily_loss_blocks() {
        let mut manager = RiskManager::new(config());
        manager.reset_daily_state();
        manager.state.daily_realized_pnl = -60.0;
        let check = manager.check_order(&signal("TEST-1", OrderSide::Yes), 10.0);
        assert!(!check.passed);
        assert!(check.reason.unwrap().contains("Daily loss"));
    }

    #[test]
    fn test_trade_cap_blocks() {
        let mut manager = RiskManager::new(config());
        manager.reset_daily_state();
        manager.state.trades_today = 20;
        let check = manager.check_order(&signal("TEST-1", OrderSide::Yes), 10.0);
        assert!(!check.passed);
        assert!(check.reason.unwrap().contains("Max trades"));
    }

    #[test]
    fn test_exposure_limits_block() {
        let mut manager = RiskManager::new(config());
        manager.reset_daily_state();
        manager.state.total_exposure = 95.0;
        let check = manager.check_order(&signal("TEST-1", OrderSide::Yes), 10.0);
        assert!(!check.passed);
        assert!(check.reason.unwrap().contains("Total exposure"));

        let mut manager = RiskManager::new(config());
        manager.reset_daily_state();
        let check = manager.check_order(&signal("TEST-1", OrderSide::Yes), 25.0);
        assert!(!check.passed);
        assert!(check.reason.unwrap().contains("Market exposure"));
    }

    #[test]
    fn test_signal_quality_blocks() {
        let mut manager = RiskManager::new(config());
        manager.reset_daily_state();

        let mut weak = signal("TEST-1", OrderSide::Yes);
        weak.expected_value = 0.001;
        assert!(!manager.check_order(&weak, 10.0).passed);

        let mut shaky = signal("TEST-1", OrderSide::Yes);
        shaky.confidence = 0.1;
        assert!(!manager.check_order(&shaky, 10.0).passed);

        let mut unproven = signal("TEST-1", OrderSide::Yes);
        unproven.backtest_win_rate = Some(0.55);
        assert!(!manager.check_order(&unproven, 10.0).passed);

        let mut thin = signal("TEST-1", OrderSide::Yes);
        thin.backtest_win_rate = Some(0.80);
        thin.backtest_samples = Some(5);
        assert!(!manager.check_order(&thin, 10.0).passed);
    }

    #[test]
    fn test_kelly_sizing_positive_edge() {
        let mut manager = RiskManager::new(config());
        manager.reset_daily_state();
        // fair 0.6 at 50c: b = 1, f = 0.2, quarter Kelly 0.05 x $100
        // bankroll = $5 -> 10 contracts at 50c
        let contracts =
            manager.calculate_allowed_contracts(&signal("TEST-1", OrderSide::Yes), 10.0);
        assert_eq!(contracts, 10);
    }

    #[test]
    fn test_kelly_no_side_edge_sizes_minimum() {
        let mut manager = RiskManager::new(config());
        manager.reset_daily_state();
        // NO side with fair 0.6 means directional p = 0.4 at 50c: negative
        // Kelly clamps to zero dollars, floor of one contract
        let contracts =
            manager.calculate_allowed_contracts(&signal("TEST-1", OrderSide::No), 10.0);
        assert_eq!(contracts, 1);
    }

    #[test]
    fn test_fixed_sizing_when_kelly_disabled() {
        let mut cfg = config();
        cfg.use_kelly_sizing = false;
        let mut manager = RiskManager::new(cfg);
        manager.reset_daily_state();
        // min(10, default 5, per-market 20) = $5 -> 10 contracts at 50c
        let contracts =
            manager.calculate_allowed_contracts(&signal("TEST-1", OrderSide::Yes), 10.0);
        assert_eq!(contracts, 10);
    }

    #[test]
    fn test_idempotency_set() {
        let mut manager = RiskManager::new(config());
        manager.reset_daily_state();

        assert!(manager.check_idempotency("key-1"));
        manager.record_order_submitted(&order("TEST-1", "key-1", 50, 10));
        assert!(!manager.check_idempotency("key-1"));
        assert!(manager.check_idempotency("key-2"));

        // Reset clears the set
        manager.reset_daily_state();
        assert!(manager.check_idempotency("key-1"));
    }

    #[test]
    fn test_exposure_monotonicity() {
        let mut manager = RiskManager::new(config());
        manager.reset_daily_state();

        let o = order("TEST-1", "key-1", 50, 10);
        let notional = o.notional_value();

        manager.record_order_submitted(&o);
        assert!((manager.state.pending_order_exposure - notional).abs() < 1e-12);

        manager.record_fill(&o);
        // Pending released by at most the notional, clamped at zero
        assert!(manager.state.pending_order_exposure >= 0.0);
        assert!(manager.state.pending_order_exposure < 1e-12);
        assert!((manager.state.total_exposure - notional).abs() < 1e-12);
        assert!(manager.state.peak_exposure >= notional);
    }

    #[test]
    fn test_fill_accounting_weighted_entry() {
        let mut manager = RiskManager::new(config());
        manager.reset_daily_state();

        manager.record_fill(&order("TEST-1", "k1", 40, 10));
        manager.record_fill(&order("TEST-1", "k2", 60, 10));

        let position = manager.state.open_positions.get("TEST-1").unwrap();
        assert_eq!(position.quantity, 20);
        assert!((position.average_entry_price - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_record_pnl_evicts_position() {
        let mut manager = RiskManager::new(config());
        manager.reset_daily_state();
        manager.record_fill(&order("TEST-1", "k1", 50, 10));

        manager.record_pnl("TEST-1", 2.5);
        assert!(manager.state.open_positions.is_empty());
        assert!((manager.state.daily_realized_pnl - 2.5).abs() < 1e-12);
        assert_eq!(manager.state.trades_won, 1);
        assert!((manager.state.total_exposure - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_daily_summary() {
        let mut manager = RiskManager::new(config());
        manager.reset_daily_state();
        let o = order("TEST-1", "k1", 50, 10);
        manager.record_order_submitted(&o);
        manager.record_fill(&o);
        manager.record_pnl("TEST-1", 1.0);

        let summary = manager.daily_summary();
        assert_eq!(summary.trades_placed, 1);
        assert_eq!(summary.trades_filled, 1);
        assert_eq!(summary.trades_won, 1);
        assert_eq!(summary.markets_traded, vec!["TEST-1"]);
        assert!(summary.peak_exposure > 0.0);
    }
}
