//! Domain data models.
//!
//! Prices are carried in one of two canonical forms: integer cents in 1..99
//! at the exchange boundary, and f64 decimals in [0, 1] everywhere else.
//! Conversions are explicit via `cents_to_decimal` / `decimal_to_cents`.

pub mod comparison;
pub mod market;
pub mod odds;
pub mod order;
pub mod position;
pub mod probability;
pub mod snapshot;

pub use comparison::{Alert, Confidence, Direction, Opportunity};
pub use market::{
    cents_to_decimal, decimal_to_cents, Contract, OrderBook, OrderBookLevel, TopOfBook,
};
pub use odds::{MarketType, OddsFormat, OddsQuote};
pub use order::{Fill, Order, OrderSide, OrderStatus, OrderType};
pub use position::{DailyPnl, Position};
pub use probability::{NormalizedProb, VigMethod};
pub use snapshot::{BacktestResult, MarketSnapshot, StrategySignal};
