//! Position and daily P&L tracking.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::order::OrderSide;

/// Net position in one market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub side: OrderSide,
    pub quantity: i64,
    /// Volume-weighted average entry price in cents
    pub average_entry_price: f64,

    /// Latest mark in cents
    pub current_price: Option<i64>,

    pub opened_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Position {
    pub fn new(ticker: &str, side: OrderSide, quantity: i64, entry_price: f64) -> Self {
        let now = Utc::now();
        Self {
            ticker: ticker.to_string(),
            side,
            quantity,
            average_entry_price: entry_price,
            current_price: None,
            opened_at: now,
            last_updated: now,
        }
    }

    /// Total cost in dollars.
    pub fn cost_basis(&self) -> f64 {
        self.average_entry_price * self.quantity as f64 / 100.0
    }

    pub fn current_value(&self) -> Option<f64> {
        let mark = self.current_price?;
        Some((mark * self.quantity) as f64 / 100.0)
    }

    pub fn unrealized_pnl(&self) -> Option<f64> {
        Some(self.current_value()? - self.cost_basis())
    }

    pub fn unrealized_pnl_percent(&self) -> Option<f64> {
        let pnl = self.unrealized_pnl()?;
        let basis = self.cost_basis();
        if basis == 0.0 {
            return None;
        }
        Some(pnl / basis)
    }

    pub fn update_price(&mut self, price: i64) {
        self.current_price = Some(price);
        self.last_updated = Utc::now();
    }

    /// Add to the position; entry price re-weights by quantity.
    pub fn add_quantity(&mut self, quantity: i64, price: f64) {
        let total_cost = self.average_entry_price * self.quantity as f64 + price * quantity as f64;
        self.quantity += quantity;
        if self.quantity > 0 {
            self.average_entry_price = total_cost / self.quantity as f64;
        }
        self.last_updated = Utc::now();
    }

    /// Reduce the position; quantity floors at zero.
    pub fn reduce_quantity(&mut self, quantity: i64) {
        self.quantity = (self.quantity - quantity).max(0);
        self.last_updated = Utc::now();
    }
}

/// Daily profit and loss record, keyed by local-calendar date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyPnl {
    pub date: NaiveDate,

    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub fees: f64,

    pub trades_placed: i64,
    pub trades_filled: i64,
    pub trades_won: i64,
    pub trades_lost: i64,

    /// Maximum capital at risk during the day
    pub peak_exposure: f64,
    /// End-of-day capital at risk
    pub ending_exposure: f64,

    pub markets_traded: Vec<String>,
}

impl DailyPnl {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            fees: 0.0,
            trades_placed: 0,
            trades_filled: 0,
            trades_won: 0,
            trades_lost: 0,
            peak_exposure: 0.0,
            ending_exposure: 0.0,
            markets_traded: Vec::new(),
        }
    }

    pub fn total_pnl(&self) -> f64 {
        self.realized_pnl + self.unrealized_pnl - self.fees
    }

    pub fn win_rate(&self) -> Option<f64> {
        let total = self.trades_won + self.trades_lost;
        if total == 0 {
            return None;
        }
        Some(self.trades_won as f64 / total as f64)
    }

    pub fn fill_rate(&self) -> Option<f64> {
        if self.trades_placed == 0 {
            return None;
        }
        Some(self.trades_filled as f64 / self.trades_placed as f64)
    }

    pub fn record_trade(&mut self, won: bool, pnl: f64) {
        if won {
            self.trades_won += 1;
        } else {
            self.trades_lost += 1;
        }
        self.realized_pnl += pnl;
    }

    pub fn update_exposure(&mut self, exposure: f64) {
        self.ending_exposure = exposure;
        if exposure > self.peak_exposure {
            self.peak_exposure = exposure;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_weighted_entry() {
        let mut pos = Position::new("TEST-1", OrderSide::Yes, 100, 50.0);
        pos.add_quantity(100, 60.0);
        assert_eq!(pos.quantity, 200);
        assert!((pos.average_entry_price - 55.0).abs() < 1e-12);
        assert!((pos.cost_basis() - 110.0).abs() < 1e-12);
    }

    #[test]
    fn test_position_unrealized_pnl() {
        let mut pos = Position::new("TEST-1", OrderSide::Yes, 100, 50.0);
        assert!(pos.unrealized_pnl().is_none());
        pos.update_price(58);
        assert!((pos.unrealized_pnl().unwrap() - 8.0).abs() < 1e-12);
        assert!((pos.unrealized_pnl_percent().unwrap() - 0.16).abs() < 1e-12);
    }

    #[test]
    fn test_position_reduce_floors_at_zero() {
        let mut pos = Position::new("TEST-1", OrderSide::No, 50, 40.0);
        pos.reduce_quantity(80);
        assert_eq!(pos.quantity, 0);
    }

    #[test]
    fn test_daily_pnl_rates() {
        let mut pnl = DailyPnl::new(NaiveDate::from_ymd_opt(2026, 2, 7).unwrap());
        assert!(pnl.win_rate().is_none());
        pnl.record_trade(true, 3.0);
        pnl.record_trade(false, -1.0);
        assert!((pnl.win_rate().unwrap() - 0.5).abs() < 1e-12);
        assert!((pnl.realized_pnl - 2.0).abs() < 1e-12);

        pnl.update_exposure(40.0);
        pnl.update_exposure(25.0);
        assert!((pnl.peak_exposure - 40.0).abs() < 1e-12);
        assert!((pnl.ending_exposure - 25.0).abs() < 1e-12);
    }
}
