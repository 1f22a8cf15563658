//! Order and fill models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side: buy YES or buy NO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Yes,
    No,
}

impl OrderSide {
    pub fn as_str(&self) -> &str {
        match self {
            OrderSide::Yes => "yes",
            OrderSide::No => "no",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "yes" => Some(OrderSide::Yes),
            "no" => Some(OrderSide::No),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "limit" => Some(OrderType::Limit),
            "market" => Some(OrderType::Market),
            _ => None,
        }
    }
}

/// Order lifecycle status. Transitions are monotone toward a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, not yet submitted
    Pending,
    /// Sent to the exchange
    Submitted,
    /// Resting on the orderbook
    Open,
    /// Some quantity filled
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "submitted" => Some(OrderStatus::Submitted),
            "open" => Some(OrderStatus::Open),
            "partially_filled" => Some(OrderStatus::PartiallyFilled),
            "filled" => Some(OrderStatus::Filled),
            "cancelled" => Some(OrderStatus::Cancelled),
            "rejected" => Some(OrderStatus::Rejected),
            "expired" => Some(OrderStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    /// Rank in the monotone lifecycle. Terminal states share the top rank so
    /// a reconciler never walks a terminal order backwards.
    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Submitted => 1,
            OrderStatus::Open => 2,
            OrderStatus::PartiallyFilled => 3,
            OrderStatus::Filled
            | OrderStatus::Cancelled
            | OrderStatus::Rejected
            | OrderStatus::Expired => 4,
        }
    }

    /// Whether moving to `next` respects the monotone lifecycle.
    pub fn can_advance_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

/// A trading order on the exchange leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// `YYYY-MM-DD:ticker:strategy:side` - prevents duplicate submissions
    pub idempotency_key: String,
    pub exchange_order_id: Option<String>,

    pub ticker: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Limit price in cents (1-99)
    pub price: i64,
    pub quantity: i64,

    pub strategy_name: String,
    pub signal_confidence: f64,
    pub expected_value: f64,

    pub status: OrderStatus,
    pub filled_quantity: i64,
    pub average_fill_price: Option<f64>,

    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,

    pub error_message: Option<String>,
}

impl Order {
    pub fn new(
        ticker: &str,
        side: OrderSide,
        order_type: OrderType,
        price: i64,
        quantity: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            idempotency_key: String::new(),
            exchange_order_id: None,
            ticker: ticker.to_string(),
            side,
            order_type,
            price,
            quantity,
            strategy_name: String::new(),
            signal_confidence: 0.0,
            expected_value: 0.0,
            status: OrderStatus::Pending,
            filled_quantity: 0,
            average_fill_price: None,
            created_at: Utc::now(),
            submitted_at: None,
            filled_at: None,
            error_message: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn remaining_quantity(&self) -> i64 {
        self.quantity - self.filled_quantity
    }

    /// Total order value in dollars.
    pub fn notional_value(&self) -> f64 {
        (self.price * self.quantity) as f64 / 100.0
    }

    pub fn fill_rate(&self) -> f64 {
        if self.quantity == 0 {
            return 0.0;
        }
        self.filled_quantity as f64 / self.quantity as f64
    }

    /// Build the idempotency key for a (date, ticker, strategy, side).
    pub fn idempotency_key_for(
        date: DateTime<Utc>,
        ticker: &str,
        strategy: &str,
        side: OrderSide,
    ) -> String {
        format!(
            "{}:{}:{}:{}",
            date.format("%Y-%m-%d"),
            ticker,
            strategy,
            side.as_str()
        )
    }
}

/// An execution against an order. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub id: String,
    pub order_id: String,
    pub exchange_trade_id: Option<String>,

    pub ticker: String,
    pub side: OrderSide,
    /// Fill price in cents
    pub price: i64,
    pub quantity: i64,

    /// Fill value in dollars
    pub notional: f64,
    pub fees: f64,

    pub timestamp: DateTime<Utc>,
}

impl Fill {
    pub fn from_order(
        order: &Order,
        fill_price: i64,
        fill_quantity: i64,
        exchange_trade_id: Option<String>,
        fees: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            exchange_trade_id,
            ticker: order.ticker.clone(),
            side: order.side,
            price: fill_price,
            quantity: fill_quantity,
            notional: (fill_price * fill_quantity) as f64 / 100.0,
            fees,
            timestamp: Utc::now(),
        }
    }
}
