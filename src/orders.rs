//! Order management: build orders from signals, enforce idempotency, route
//! by trading mode, and reconcile status with the exchange.
//!
//! Persistence is write-then-acknowledge: an order row is durable before
//! its idempotency key is considered spent, so a crash between the two can
//! only produce a duplicate-key insert, which the store treats as success.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::clients::{ClientError, ExchangeClient};
use crate::config::{Config, TradingMode};
use crate::models::{Fill, Order, OrderStatus, OrderType, StrategySignal};
use crate::risk::RiskManager;
use crate::store::Repository;

pub struct OrderManager {
    client: Arc<dyn ExchangeClient>,
    risk: Arc<Mutex<RiskManager>>,
    repository: Arc<Repository>,
    config: Config,
    mode: TradingMode,

    orders: Mutex<HashMap<String, Order>>,
}

impl OrderManager {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        risk: Arc<Mutex<RiskManager>>,
        repository: Arc<Repository>,
        config: Config,
    ) -> Self {
        let mode = config.mode;
        Self {
            client,
            risk,
            repository,
            config,
            mode,
            orders: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_mode(mut self, mode: TradingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Process a signal into an order, or nothing when any gate rejects it.
    pub async fn process_signal(
        &self,
        signal: &StrategySignal,
        proposed_dollars: Option<f64>,
    ) -> Result<Option<Order>> {
        let side = match signal.side {
            Some(side) => side,
            None => return Ok(None),
        };

        let proposed = proposed_dollars.unwrap_or(self.config.default_position_size_dollars);

        let check = self.risk.lock().check_order(signal, proposed);
        if !check.passed {
            info!(
                "signal rejected by risk: {} {} - {}",
                signal.ticker,
                signal.strategy_name,
                check.reason.as_deref().unwrap_or("unknown")
            );
            return Ok(None);
        }
        let quantity = check.allowed_contracts.unwrap_or(1);

        // The entry price must already be a valid cent price; out of range
        // is a bug upstream, never silently clamped.
        let price = signal.entry_price.unwrap_or(50);
        if !(1..=99).contains(&price) {
            bail!(
                "entry price {} outside 1..99 for {}",
                price,
                signal.ticker
            );
        }

        let order_type = if self.config.use_limit_orders_only {
            OrderType::Limit
        } else {
            OrderType::Market
        };

        let mut order = Order::new(&signal.ticker, side, order_type, price, quantity);
        order.idempotency_key =
            Order::idempotency_key_for(order.created_at, &signal.ticker, &signal.strategy_name, side);
        order.strategy_name = signal.strategy_name.clone();
        order.signal_confidence = signal.confidence;
        order.expected_value = signal.expected_value;

        if !self.risk.lock().check_idempotency(&order.idempotency_key) {
            info!(
                "duplicate order skipped: {} ({})",
                signal.ticker, order.idempotency_key
            );
            return Ok(None);
        }

        info!(
            "order created: {} {} {}x{} @ {}c [{}]",
            order.ticker,
            order.side.as_str(),
            order.order_type.as_str(),
            order.quantity,
            order.price,
            order.idempotency_key
        );

        let order = match self.mode {
            TradingMode::DryRun => self.dry_run_order(order).await?,
            TradingMode::Paper => self.paper_order(order).await?,
            TradingMode::Live => self.live_order(order).await?,
        };

        Ok(Some(order))
    }

    /// Log and persist without submitting.
    async fn dry_run_order(&self, mut order: Order) -> Result<Order> {
        info!(
            "dry run: {} {} {}x{} @ {}c (${:.2} notional)",
            order.ticker,
            order.side.as_str(),
            order.order_type.as_str(),
            order.quantity,
            order.price,
            order.notional_value()
        );
        order.status = OrderStatus::Pending;
        self.repository.save_order(&order)?;
        self.orders.lock().insert(order.id.clone(), order.clone());
        Ok(order)
    }

    /// Submit against the paper fill simulator.
    async fn paper_order(&self, order: Order) -> Result<Order> {
        // Durable before the key is spent.
        self.repository.save_order(&order)?;
        self.risk.lock().record_order_submitted(&order);

        let order = match self.client.place_order(order.clone()).await {
            Ok(placed) => placed,
            Err(e) => self.reject_order(order, &e.to_string())?,
        };
        self.finish_submission(order)
    }

    /// Submit to the real exchange. Missing credentials reject immediately,
    /// before any submission is attempted.
    async fn live_order(&self, order: Order) -> Result<Order> {
        if !self.config.exchange_configured() {
            error!("live order blocked: no exchange credentials configured");
            let order = self.reject_order(order, "No exchange credentials configured")?;
            return Ok(order);
        }

        self.repository.save_order(&order)?;
        self.risk.lock().record_order_submitted(&order);

        let order = match self.client.place_order(order.clone()).await {
            Ok(placed) => placed,
            Err(ClientError::UpstreamBusiness { reason, .. }) => {
                self.reject_order(order, &reason)?
            }
            Err(e) => {
                error!("live order failed: {} - {}", order.ticker, e);
                self.reject_order(order, &e.to_string())?
            }
        };
        self.finish_submission(order)
    }

    fn reject_order(&self, mut order: Order, reason: &str) -> Result<Order> {
        warn!("order rejected: {} - {}", order.ticker, reason);
        order.status = OrderStatus::Rejected;
        order.error_message = Some(reason.to_string());
        self.repository.save_order(&order)?;
        self.orders.lock().insert(order.id.clone(), order.clone());
        Ok(order)
    }

    /// Record fills, persist, and track the order.
    fn finish_submission(&self, order: Order) -> Result<Order> {
        if order.status == OrderStatus::Filled {
            self.risk.lock().record_fill(&order);
            let fill_price = order.average_fill_price.unwrap_or(order.price as f64) as i64;
            let fill = Fill::from_order(&order, fill_price, order.filled_quantity, None, 0.0);
            self.repository.save_fill(&fill)?;
        }
        self.repository.save_order(&order)?;
        self.orders.lock().insert(order.id.clone(), order.clone());

        info!(
            "order result: {} -> {} ({}x filled)",
            order.ticker,
            order.status.as_str(),
            order.filled_quantity
        );
        Ok(order)
    }

    /// Pull exchange-side status and reconcile monotonically.
    pub async fn sync_order(&self, order_id: &str) -> Result<Option<Order>> {
        let mut order = match self.orders.lock().get(order_id) {
            Some(order) => order.clone(),
            None => return Ok(None),
        };
        let exchange_order_id = match &order.exchange_order_id {
            Some(id) => id.clone(),
            None => return Ok(Some(order)),
        };

        match self.client.get_order(&exchange_order_id).await {
            Ok(Some(remote)) => {
                if order.status.can_advance_to(remote.status) {
                    order.status = remote.status;
                }
                order.filled_quantity = order.filled_quantity.max(remote.filled_quantity);
                if remote.average_fill_price.is_some() {
                    order.average_fill_price = remote.average_fill_price;
                }
                // Promote once fills cover the quantity.
                if order.filled_quantity >= order.quantity
                    && order.status.can_advance_to(OrderStatus::Filled)
                {
                    order.status = OrderStatus::Filled;
                }
                if order.status == OrderStatus::Filled && order.filled_at.is_none() {
                    order.filled_at = Some(chrono::Utc::now());
                    self.risk.lock().record_fill(&order);
                }
                self.repository.save_order(&order)?;
                self.orders.lock().insert(order.id.clone(), order.clone());
            }
            Ok(None) => warn!("order {} not found on exchange", exchange_order_id),
            Err(e) => error!("order sync failed for {}: {}", order_id, e),
        }

        Ok(Some(order))
    }

    /// Cancel an order: local-only when it never reached the exchange.
    pub async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        let mut order = match self.orders.lock().get(order_id) {
            Some(order) => order.clone(),
            None => return Ok(false),
        };

        let cancelled = match &order.exchange_order_id {
            None => true,
            Some(exchange_id) => self.client.cancel_order(exchange_id).await.unwrap_or(false),
        };

        if cancelled && order.status.can_advance_to(OrderStatus::Cancelled) {
            order.status = OrderStatus::Cancelled;
            self.repository.save_order(&order)?;
            self.orders.lock().insert(order.id.clone(), order.clone());
        }
        Ok(cancelled)
    }

    pub fn get_order(&self, order_id: &str) -> Option<Order> {
        self.orders.lock().get(order_id).cloned()
    }

    pub fn pending_orders(&self) -> Vec<Order> {
        self.orders
            .lock()
            .values()
            .filter(|o| {
                matches!(
                    o.status,
                    OrderStatus::Pending | OrderStatus::Submitted | OrderStatus::Open
                )
            })
            .cloned()
            .collect()
    }
}
