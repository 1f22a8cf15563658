//! Mock exchange client for testing and paper trading.
//!
//! Simulates market data with seeded same-day markets and paper fills with
//! configurable fill probability and slippage, checked against a simulated
//! balance.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Timelike, Utc};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clients::{ClientError, ClientResult, ExchangeClient};
use crate::models::{
    Contract, Fill, Order, OrderBook, OrderBookLevel, OrderStatus, Position, TopOfBook,
};

pub struct MockExchangeClient {
    fill_probability: f64,
    slippage_cents: i64,
    state: Mutex<MockState>,
}

struct MockState {
    balance: f64,
    markets: Vec<Contract>,
    orders: Vec<Order>,
    fills: Vec<Fill>,
}

impl Default for MockExchangeClient {
    fn default() -> Self {
        Self::new(0.8, 1, 1_000.0)
    }
}

impl MockExchangeClient {
    pub fn new(fill_probability: f64, slippage_cents: i64, initial_balance: f64) -> Self {
        let client = Self {
            fill_probability,
            slippage_cents,
            state: Mutex::new(MockState {
                balance: initial_balance,
                markets: Vec::new(),
                orders: Vec::new(),
                fills: Vec::new(),
            }),
        };
        client.seed_test_markets();
        client
    }

    /// Paper client that always fills at the limit price. Used by tests that
    /// need deterministic outcomes.
    pub fn always_fill(initial_balance: f64) -> Self {
        Self::new(1.0, 0, initial_balance)
    }

    fn seed_test_markets(&self) {
        // Close at 23:00 UTC today so the markets pass the same-day filter.
        let today_close = Utc::now()
            .with_hour(23)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .unwrap_or_else(Utc::now);

        let mut state = self.state.lock();

        state.markets.push(test_contract(
            "TEST-TODAY-A",
            "Test Market A - Same Day Expiry",
            55,
            500,
            today_close,
            book(&[(54, 100), (53, 200), (52, 300)], &[(56, 100), (57, 200), (58, 300)]),
        ));
        state.markets.push(test_contract(
            "TEST-TODAY-B",
            "Test Market B - Same Day Expiry",
            30,
            100,
            today_close,
            book(&[(28, 50), (26, 100)], &[(35, 50), (37, 100)]),
        ));
        state.markets.push(test_contract(
            "TEST-TOMORROW-C",
            "Test Market C - Tomorrow Expiry",
            70,
            300,
            today_close + ChronoDuration::days(1),
            book(&[(69, 100)], &[(71, 100)]),
        ));
    }

    /// Add a market for a specific test scenario.
    pub fn add_test_market(
        &self,
        ticker: &str,
        last_price: i64,
        volume_24h: i64,
        spread: i64,
        expires_today: bool,
    ) {
        let mut close = Utc::now()
            .with_hour(23)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .unwrap_or_else(Utc::now);
        if !expires_today {
            close = close + ChronoDuration::days(1);
        }
        let bid = last_price - spread / 2;
        let ask = last_price + spread - spread / 2;
        let contract = test_contract(
            ticker,
            &format!("Test Market {}", ticker),
            last_price,
            volume_24h,
            close,
            book(&[(bid, 100)], &[(ask, 100)]),
        );
        self.state.lock().markets.push(contract);
    }

    pub fn balance_now(&self) -> f64 {
        self.state.lock().balance
    }
}

fn book(bids: &[(i64, i64)], asks: &[(i64, i64)]) -> OrderBook {
    OrderBook {
        yes_bids: bids
            .iter()
            .map(|&(price, quantity)| OrderBookLevel { price, quantity })
            .collect(),
        yes_asks: asks
            .iter()
            .map(|&(price, quantity)| OrderBookLevel { price, quantity })
            .collect(),
        timestamp: Utc::now(),
    }
}

fn test_contract(
    ticker: &str,
    title: &str,
    last_price: i64,
    volume_24h: i64,
    close: chrono::DateTime<Utc>,
    orderbook: OrderBook,
) -> Contract {
    Contract {
        ticker: ticker.to_string(),
        title: title.to_string(),
        subtitle: String::new(),
        category: "test".to_string(),
        event_ticker: "TEST-EVENT".to_string(),
        series_ticker: String::new(),
        status: "active".to_string(),
        result: None,
        close_time: Some(close),
        expiration_time: Some(close),
        last_price,
        volume: volume_24h * 10,
        volume_24h,
        open_interest: volume_24h * 2,
        orderbook: Some(orderbook),
    }
}

#[async_trait]
impl ExchangeClient for MockExchangeClient {
    async fn get_markets(
        &self,
        limit: usize,
        _cursor: Option<String>,
        event_ticker: Option<String>,
    ) -> ClientResult<(Vec<Contract>, Option<String>)> {
        let state = self.state.lock();
        let markets: Vec<Contract> = state
            .markets
            .iter()
            .filter(|m| {
                event_ticker
                    .as_ref()
                    .map(|e| &m.event_ticker == e)
                    .unwrap_or(true)
            })
            .take(limit)
            .cloned()
            .collect();
        Ok((markets, None))
    }

    async fn get_market(&self, ticker: &str) -> ClientResult<Option<Contract>> {
        let state = self.state.lock();
        Ok(state.markets.iter().find(|m| m.ticker == ticker).cloned())
    }

    async fn get_orderbook(&self, ticker: &str) -> ClientResult<Option<OrderBook>> {
        let state = self.state.lock();
        Ok(state
            .markets
            .iter()
            .find(|m| m.ticker == ticker)
            .and_then(|m| m.orderbook.clone()))
    }

    async fn get_top_of_book(&self, ticker: &str) -> ClientResult<Option<TopOfBook>> {
        Ok(self
            .get_orderbook(ticker)
            .await?
            .map(|book| TopOfBook::from_orderbook(ticker, &book)))
    }

    async fn get_events(
        &self,
        _limit: usize,
        _cursor: Option<String>,
    ) -> ClientResult<(Vec<serde_json::Value>, Option<String>)> {
        Ok((vec![serde_json::json!({"event_ticker": "TEST-EVENT"})], None))
    }

    async fn place_order(&self, mut order: Order) -> ClientResult<Order> {
        if !(1..=99).contains(&order.price) {
            return Err(ClientError::UpstreamBusiness {
                status: 400,
                reason: format!("price {} outside 1..99", order.price),
            });
        }

        let mut state = self.state.lock();

        order.exchange_order_id = Some(format!("mock-{}", Uuid::new_v4()));
        order.submitted_at = Some(Utc::now());
        order.status = OrderStatus::Submitted;

        let notional = order.notional_value();
        if notional > state.balance {
            order.status = OrderStatus::Rejected;
            order.error_message = Some(format!(
                "insufficient balance: ${:.2} needed, ${:.2} available",
                notional, state.balance
            ));
            state.orders.push(order.clone());
            return Ok(order);
        }

        let fills_now = rand::thread_rng().gen_bool(self.fill_probability.clamp(0.0, 1.0));
        if fills_now {
            let fill_price = (order.price + self.slippage_cents).min(99);
            order.status = OrderStatus::Filled;
            order.filled_quantity = order.quantity;
            order.average_fill_price = Some(fill_price as f64);
            order.filled_at = Some(Utc::now());

            let fill = Fill::from_order(&order, fill_price, order.quantity, None, 0.0);
            state.balance -= fill.notional;
            state.fills.push(fill);
            debug!(
                "paper fill: {} {}x{} @ {}c",
                order.ticker, order.side.as_str(), order.quantity, fill_price
            );
        } else {
            order.status = OrderStatus::Open;
            info!("paper order resting: {} @ {}c", order.ticker, order.price);
        }

        state.orders.push(order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, exchange_order_id: &str) -> ClientResult<bool> {
        let mut state = self.state.lock();
        if let Some(order) = state
            .orders
            .iter_mut()
            .find(|o| o.exchange_order_id.as_deref() == Some(exchange_order_id))
        {
            if !order.status.is_terminal() {
                order.status = OrderStatus::Cancelled;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn get_order(&self, exchange_order_id: &str) -> ClientResult<Option<Order>> {
        let state = self.state.lock();
        Ok(state
            .orders
            .iter()
            .find(|o| o.exchange_order_id.as_deref() == Some(exchange_order_id))
            .cloned())
    }

    async fn get_fills(&self, ticker: Option<&str>, limit: usize) -> ClientResult<Vec<Fill>> {
        let state = self.state.lock();
        Ok(state
            .fills
            .iter()
            .filter(|f| ticker.map(|t| f.ticker == t).unwrap_or(true))
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_balance(&self) -> ClientResult<f64> {
        Ok(self.state.lock().balance)
    }

    async fn get_positions(&self) -> ClientResult<Vec<Position>> {
        // Net filled orders per ticker
        let state = self.state.lock();
        let mut positions: Vec<Position> = Vec::new();
        for fill in &state.fills {
            match positions.iter_mut().find(|p| p.ticker == fill.ticker) {
                Some(pos) => pos.add_quantity(fill.quantity, fill.price as f64),
                None => positions.push(Position::new(
                    &fill.ticker,
                    fill.side,
                    fill.quantity,
                    fill.price as f64,
                )),
            }
        }
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, OrderType};

    #[tokio::test]
    async fn test_seeded_markets_visible() {
        let client = MockExchangeClient::default();
        let (markets, cursor) = client.get_markets(100, None, None).await.unwrap();
        assert!(markets.len() >= 3);
        assert!(cursor.is_none());
        assert!(markets.iter().any(|m| m.ticker == "TEST-TODAY-A"));
    }

    #[tokio::test]
    async fn test_paper_fill_deducts_balance() {
        let client = MockExchangeClient::always_fill(1_000.0);
        let order = Order::new("TEST-TODAY-A", OrderSide::Yes, OrderType::Limit, 56, 10);
        let placed = client.place_order(order).await.unwrap();
        assert_eq!(placed.status, OrderStatus::Filled);
        assert_eq!(placed.filled_quantity, 10);
        // 10 contracts at 56c
        assert!((client.balance_now() - (1_000.0 - 5.6)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_insufficient_balance_rejects() {
        let client = MockExchangeClient::always_fill(1.0);
        let order = Order::new("TEST-TODAY-A", OrderSide::Yes, OrderType::Limit, 56, 1000);
        let placed = client.place_order(order).await.unwrap();
        assert_eq!(placed.status, OrderStatus::Rejected);
        assert!(placed.error_message.unwrap().contains("insufficient balance"));
    }

    #[tokio::test]
    async fn test_price_out_of_range_rejected() {
        let client = MockExchangeClient::default();
        let order = Order::new("TEST-TODAY-A", OrderSide::Yes, OrderType::Limit, 0, 10);
        assert!(client.place_order(order).await.is_err());
        let order = Order::new("TEST-TODAY-A", OrderSide::Yes, OrderType::Limit, 100, 10);
        assert!(client.place_order(order).await.is_err());
    }
}
