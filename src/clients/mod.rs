//! Venue clients: the prediction-market exchange and the odds aggregator.
//!
//! The rest of the system consumes these through the `ExchangeClient` trait
//! so the runner can swap the HTTP client for the mock in paper and dry-run
//! modes.

pub mod exchange;
pub mod mock;
pub mod odds_api;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Contract, Fill, Order, OrderBook, Position, TopOfBook};

pub use exchange::ExchangeHttpClient;
pub use mock::MockExchangeClient;
pub use odds_api::OddsApiClient;

/// Error taxonomy for venue calls. Retry policy lives with the callers:
/// transport errors back off and retry, rate limits sleep the hint, auth is
/// fatal to the cycle, business rejections fail only the current order.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("upstream rejected request ({status}): {reason}")]
    UpstreamBusiness { status: u16, reason: String },

    #[error("not found: {0}")]
    NotFound(String),
}

impl ClientError {
    /// Whether the caller may retry this error with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Operations the core consumes from the exchange.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Paginated market listing. Returns (contracts, next_cursor).
    async fn get_markets(
        &self,
        limit: usize,
        cursor: Option<String>,
        event_ticker: Option<String>,
    ) -> ClientResult<(Vec<Contract>, Option<String>)>;

    async fn get_market(&self, ticker: &str) -> ClientResult<Option<Contract>>;

    async fn get_orderbook(&self, ticker: &str) -> ClientResult<Option<OrderBook>>;

    async fn get_top_of_book(&self, ticker: &str) -> ClientResult<Option<TopOfBook>>;

    /// Paginated event listing. Returns (events as raw JSON, next_cursor).
    async fn get_events(
        &self,
        limit: usize,
        cursor: Option<String>,
    ) -> ClientResult<(Vec<serde_json::Value>, Option<String>)>;

    /// Submit an order. Returns the order updated with exchange id/status.
    async fn place_order(&self, order: Order) -> ClientResult<Order>;

    async fn cancel_order(&self, exchange_order_id: &str) -> ClientResult<bool>;

    async fn get_order(&self, exchange_order_id: &str) -> ClientResult<Option<Order>>;

    async fn get_fills(&self, ticker: Option<&str>, limit: usize) -> ClientResult<Vec<Fill>>;

    /// Account balance in dollars.
    async fn get_balance(&self) -> ClientResult<f64>;

    async fn get_positions(&self) -> ClientResult<Vec<Position>>;

    /// Release any held resources. Idempotent.
    async fn close(&self) {}
}
