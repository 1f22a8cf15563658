//! Strategy plug-ins.
//!
//! A strategy evaluates a contract's current features plus history into a
//! signal, and can be replayed over historical snapshots. The registry is
//! populated explicitly at startup; adding a strategy means constructing it
//! and registering it here.

pub mod mean_reversion;
pub mod mispricing;

use crate::models::market::ContractFeatures;
use crate::models::{BacktestResult, Contract, MarketSnapshot, StrategySignal};

pub use mean_reversion::MeanReversionStrategy;
pub use mispricing::MispricingStrategy;

pub trait Strategy: Send + Sync {
    /// Unique identifier, stable across runs (used in idempotency keys).
    fn name(&self) -> &str;

    fn description(&self) -> String;

    /// Evaluate a contract and emit a signal. `history` is oldest-first.
    fn evaluate(
        &self,
        contract: &Contract,
        features: &ContractFeatures,
        history: &[MarketSnapshot],
    ) -> StrategySignal;

    /// Replay the strategy over historical snapshots. Exit for each
    /// synthetic trade is the next snapshot's mark.
    fn backtest(
        &self,
        snapshots: &[MarketSnapshot],
        settlement_price: Option<i64>,
    ) -> BacktestResult;

    /// Sanity checks on an emitted signal.
    fn validate_signal(&self, signal: &StrategySignal) -> bool {
        if !(0.0..=1.0).contains(&signal.fair_probability) {
            return false;
        }
        if !(0.0..=1.0).contains(&signal.confidence) {
            return false;
        }
        if let Some(entry) = signal.entry_price {
            if !(1..=99).contains(&entry) {
                return false;
            }
        }
        true
    }
}

/// Explicit strategy registry built at startup.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn Strategy>>,
}

impl Default for StrategyRegistry {
    /// The production set.
    fn default() -> Self {
        Self {
            strategies: vec![
                Box::new(MispricingStrategy::default()),
                Box::new(MeanReversionStrategy::default()),
            ],
        }
    }
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.push(strategy);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Strategy> {
        self.strategies
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.as_ref())
    }

    pub fn all(&self) -> impl Iterator<Item = &dyn Strategy> {
        self.strategies.iter().map(|s| s.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
