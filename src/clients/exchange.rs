//! Exchange HTTP client with signed requests, pacing, and retries.
//!
//! Requests carry an HMAC-SHA256 signature over `timestamp + method + path`
//! using the secret loaded from the configured key file. The key is read
//! once at construction and never rotated mid-run.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::clients::{ClientError, ClientResult, ExchangeClient};
use crate::models::{
    Contract, Fill, Order, OrderBook, OrderBookLevel, OrderSide, OrderStatus, Position, TopOfBook,
};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 10_000;

/// Paces requests to a minimum inter-request delay.
struct MinDelayPacer {
    min_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl MinDelayPacer {
    fn new(requests_per_second: f64) -> Self {
        let rps = requests_per_second.max(0.1);
        Self {
            min_delay: Duration::from_secs_f64(1.0 / rps),
            last_request: Mutex::new(None),
        }
    }

    async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_delay {
                sleep(self.min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

pub struct ExchangeHttpClient {
    client: Client,
    base_url: String,
    api_key_id: String,
    signing_key: Vec<u8>,
    pacer: MinDelayPacer,
}

impl ExchangeHttpClient {
    pub fn new(
        api_key_id: &str,
        private_key_path: &str,
        base_url: &str,
        requests_per_second: f64,
    ) -> ClientResult<Self> {
        let key_path = Path::new(private_key_path);
        if !key_path.exists() {
            return Err(ClientError::Auth(format!(
                "signing key file not found: {}",
                private_key_path
            )));
        }
        let signing_key = std::fs::read(key_path)
            .map_err(|e| ClientError::Auth(format!("failed to read signing key: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("edgebot/0.1")
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key_id: api_key_id.to_string(),
            signing_key,
            pacer: MinDelayPacer::new(requests_per_second),
        })
    }

    /// Signature over `timestamp + method + path`, base64-encoded.
    fn sign(&self, method: &Method, path: &str, timestamp_ms: i64) -> ClientResult<String> {
        let message = format!("{}{}{}", timestamp_ms, method.as_str(), path);
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.signing_key)
            .map_err(|e| ClientError::Auth(format!("invalid signing key: {}", e)))?;
        mac.update(message.as_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> ClientResult<serde_json::Value> {
        let mut backoff = INITIAL_BACKOFF_MS;
        let mut rate_limit_retry_spent = false;

        let mut attempt = 0;
        while attempt < MAX_RETRIES {
            self.pacer.acquire().await;

            let timestamp_ms = Utc::now().timestamp_millis();
            let signature = self.sign(&method, path, timestamp_ms)?;

            let url = format!("{}{}", self.base_url, path);
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("EDGE-ACCESS-KEY", self.api_key_id.as_str())
                .header("EDGE-ACCESS-SIGNATURE", signature)
                .header("EDGE-ACCESS-TIMESTAMP", timestamp_ms.to_string());
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(ref body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| ClientError::Transport(e.to_string()));
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(ClientError::NotFound(path.to_string()));
                    }
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        let text = response.text().await.unwrap_or_default();
                        return Err(ClientError::Auth(text));
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(2);
                        if rate_limit_retry_spent {
                            return Err(ClientError::RateLimited {
                                retry_after_secs: retry_after,
                            });
                        }
                        // Sleep the hint and retry once without consuming a
                        // backoff attempt.
                        warn!("rate limited on {}, sleeping {}s", path, retry_after);
                        sleep(Duration::from_secs(retry_after)).await;
                        rate_limit_retry_spent = true;
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    return Err(ClientError::UpstreamBusiness {
                        status: status.as_u16(),
                        reason: text,
                    });
                }
                Err(e) => {
                    warn!("request failed (attempt {}): {}", attempt + 1, e);
                }
            }

            attempt += 1;
            if attempt < MAX_RETRIES {
                debug!("retrying {} in {}ms", path, backoff);
                sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(MAX_BACKOFF_MS);
            }
        }

        Err(ClientError::Transport(format!(
            "max retries exceeded for {}",
            path
        )))
    }

    /// Low-level order submission used by the operator `execute` path,
    /// which may sell. Price must already be a valid cent price.
    pub async fn submit_order(
        &self,
        ticker: &str,
        side: OrderSide,
        action: &str,
        count: i64,
        order_type: &str,
        price_cents: i64,
        client_order_id: &str,
    ) -> ClientResult<serde_json::Value> {
        if !(1..=99).contains(&price_cents) {
            return Err(ClientError::UpstreamBusiness {
                status: 400,
                reason: format!("price {} outside 1..99", price_cents),
            });
        }
        let price_field = match side {
            OrderSide::Yes => "yes_price",
            OrderSide::No => "no_price",
        };
        let body = serde_json::json!({
            "ticker": ticker,
            "side": side.as_str(),
            "action": action,
            "count": count,
            "type": order_type,
            price_field: price_cents,
            "client_order_id": client_order_id,
        });
        self.request(Method::POST, "/portfolio/orders", &[], Some(body))
            .await
    }
}

// Wire types

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    markets: Vec<ApiMarket>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MarketResponse {
    market: ApiMarket,
}

#[derive(Debug, Deserialize, Default)]
struct ApiMarket {
    ticker: String,
    #[serde(default)]
    event_ticker: String,
    #[serde(default)]
    series_ticker: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    subtitle: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    status: String,
    result: Option<String>,
    close_time: Option<DateTime<Utc>>,
    expiration_time: Option<DateTime<Utc>>,
    #[serde(default)]
    last_price: i64,
    #[serde(default)]
    volume: i64,
    #[serde(default)]
    volume_24h: i64,
    #[serde(default)]
    open_interest: i64,
}

impl ApiMarket {
    fn into_contract(self) -> Contract {
        Contract {
            ticker: self.ticker,
            title: self.title,
            subtitle: self.subtitle,
            category: self.category,
            event_ticker: self.event_ticker,
            series_ticker: self.series_ticker,
            status: if self.status.is_empty() {
                "active".to_string()
            } else {
                self.status
            },
            result: self.result.filter(|r| !r.is_empty()),
            close_time: self.close_time,
            expiration_time: self.expiration_time,
            last_price: self.last_price,
            volume: self.volume,
            volume_24h: self.volume_24h,
            open_interest: self.open_interest,
            orderbook: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrderbookResponse {
    orderbook: ApiOrderbook,
}

/// The exchange reports resting bids on each side; YES asks are the
/// complement of NO bids (a resting NO bid at p fills a YES buy at 100 - p).
#[derive(Debug, Deserialize, Default)]
struct ApiOrderbook {
    #[serde(default)]
    yes: Vec<(i64, i64)>,
    #[serde(default)]
    no: Vec<(i64, i64)>,
}

impl ApiOrderbook {
    fn into_orderbook(self) -> OrderBook {
        OrderBook {
            yes_bids: self
                .yes
                .into_iter()
                .map(|(price, quantity)| OrderBookLevel { price, quantity })
                .collect(),
            yes_asks: self
                .no
                .into_iter()
                .map(|(price, quantity)| OrderBookLevel {
                    price: 100 - price,
                    quantity,
                })
                .collect(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order: ApiOrder,
}

#[derive(Debug, Deserialize)]
struct ApiOrder {
    order_id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    filled_count: i64,
    #[serde(default)]
    average_fill_price: Option<f64>,
}

fn map_exchange_status(status: &str) -> OrderStatus {
    match status {
        "resting" | "open" => OrderStatus::Open,
        "executed" | "filled" => OrderStatus::Filled,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "canceled" | "cancelled" => OrderStatus::Cancelled,
        "expired" => OrderStatus::Expired,
        "rejected" => OrderStatus::Rejected,
        _ => OrderStatus::Submitted,
    }
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    events: Vec<serde_json::Value>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FillsResponse {
    #[serde(default)]
    fills: Vec<ApiFill>,
}

#[derive(Debug, Deserialize)]
struct ApiFill {
    trade_id: String,
    #[serde(default)]
    order_id: String,
    ticker: String,
    side: String,
    #[serde(default)]
    yes_price: i64,
    #[serde(default)]
    no_price: i64,
    count: i64,
    created_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    /// Balance in cents
    balance: i64,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    #[serde(default)]
    market_positions: Vec<ApiPosition>,
}

#[derive(Debug, Deserialize)]
struct ApiPosition {
    ticker: String,
    /// Net contracts; positive = YES, negative = NO
    position: i64,
    #[serde(default)]
    market_exposure: i64,
}

#[async_trait]
impl ExchangeClient for ExchangeHttpClient {
    async fn get_markets(
        &self,
        limit: usize,
        cursor: Option<String>,
        event_ticker: Option<String>,
    ) -> ClientResult<(Vec<Contract>, Option<String>)> {
        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        if let Some(event) = event_ticker {
            query.push(("event_ticker", event));
        }
        let value = self.request(Method::GET, "/markets", &query, None).await?;
        let parsed: MarketsResponse = serde_json::from_value(value)
            .map_err(|e| ClientError::Transport(format!("malformed markets response: {}", e)))?;
        let contracts = parsed
            .markets
            .into_iter()
            .map(ApiMarket::into_contract)
            .collect();
        Ok((contracts, parsed.cursor.filter(|c| !c.is_empty())))
    }

    async fn get_market(&self, ticker: &str) -> ClientResult<Option<Contract>> {
        let path = format!("/markets/{}", ticker);
        match self.request(Method::GET, &path, &[], None).await {
            Ok(value) => {
                let parsed: MarketResponse = serde_json::from_value(value).map_err(|e| {
                    ClientError::Transport(format!("malformed market response: {}", e))
                })?;
                Ok(Some(parsed.market.into_contract()))
            }
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_orderbook(&self, ticker: &str) -> ClientResult<Option<OrderBook>> {
        let path = format!("/markets/{}/orderbook", ticker);
        match self.request(Method::GET, &path, &[], None).await {
            Ok(value) => {
                let parsed: OrderbookResponse = serde_json::from_value(value).map_err(|e| {
                    ClientError::Transport(format!("malformed orderbook response: {}", e))
                })?;
                Ok(Some(parsed.orderbook.into_orderbook()))
            }
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_top_of_book(&self, ticker: &str) -> ClientResult<Option<TopOfBook>> {
        let book = match self.get_orderbook(ticker).await? {
            Some(book) => book,
            None => return Ok(None),
        };
        Ok(Some(TopOfBook::from_orderbook(ticker, &book)))
    }

    async fn get_events(
        &self,
        limit: usize,
        cursor: Option<String>,
    ) -> ClientResult<(Vec<serde_json::Value>, Option<String>)> {
        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        let value = self.request(Method::GET, "/events", &query, None).await?;
        let parsed: EventsResponse = serde_json::from_value(value)
            .map_err(|e| ClientError::Transport(format!("malformed events response: {}", e)))?;
        Ok((parsed.events, parsed.cursor.filter(|c| !c.is_empty())))
    }

    async fn place_order(&self, mut order: Order) -> ClientResult<Order> {
        if !(1..=99).contains(&order.price) {
            return Err(ClientError::UpstreamBusiness {
                status: 400,
                reason: format!("price {} outside 1..99", order.price),
            });
        }
        let value = self
            .submit_order(
                &order.ticker,
                order.side,
                "buy",
                order.quantity,
                order.order_type.as_str(),
                order.price,
                &order.idempotency_key,
            )
            .await?;
        let parsed: OrderResponse = serde_json::from_value(value)
            .map_err(|e| ClientError::Transport(format!("malformed order response: {}", e)))?;

        order.exchange_order_id = Some(parsed.order.order_id);
        order.submitted_at = Some(Utc::now());
        let status = map_exchange_status(&parsed.order.status);
        if order.status.can_advance_to(status) {
            order.status = status;
        }
        order.filled_quantity = parsed.order.filled_count;
        order.average_fill_price = parsed.order.average_fill_price;
        if order.status == OrderStatus::Filled {
            order.filled_at = Some(Utc::now());
        }
        Ok(order)
    }

    async fn cancel_order(&self, exchange_order_id: &str) -> ClientResult<bool> {
        let path = format!("/portfolio/orders/{}", exchange_order_id);
        match self.request(Method::DELETE, &path, &[], None).await {
            Ok(_) => Ok(true),
            Err(ClientError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_order(&self, exchange_order_id: &str) -> ClientResult<Option<Order>> {
        let path = format!("/portfolio/orders/{}", exchange_order_id);
        match self.request(Method::GET, &path, &[], None).await {
            Ok(value) => {
                let parsed: OrderResponse = serde_json::from_value(value).map_err(|e| {
                    ClientError::Transport(format!("malformed order response: {}", e))
                })?;
                // Only exchange-derived fields; the order manager merges these
                // into its local copy.
                let mut order = Order::new("", OrderSide::Yes, crate::models::OrderType::Limit, 50, 0);
                order.exchange_order_id = Some(parsed.order.order_id);
                order.status = map_exchange_status(&parsed.order.status);
                order.filled_quantity = parsed.order.filled_count;
                order.average_fill_price = parsed.order.average_fill_price;
                Ok(Some(order))
            }
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_fills(&self, ticker: Option<&str>, limit: usize) -> ClientResult<Vec<Fill>> {
        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(ticker) = ticker {
            query.push(("ticker", ticker.to_string()));
        }
        let value = self
            .request(Method::GET, "/portfolio/fills", &query, None)
            .await?;
        let parsed: FillsResponse = serde_json::from_value(value)
            .map_err(|e| ClientError::Transport(format!("malformed fills response: {}", e)))?;

        let fills = parsed
            .fills
            .into_iter()
            .filter_map(|f| {
                let side = OrderSide::parse(&f.side)?;
                let price = match side {
                    OrderSide::Yes => f.yes_price,
                    OrderSide::No => f.no_price,
                };
                Some(Fill {
                    id: f.trade_id.clone(),
                    order_id: f.order_id,
                    exchange_trade_id: Some(f.trade_id),
                    ticker: f.ticker,
                    side,
                    price,
                    quantity: f.count,
                    notional: (price * f.count) as f64 / 100.0,
                    fees: 0.0,
                    timestamp: f.created_time.unwrap_or_else(Utc::now),
                })
            })
            .collect();
        Ok(fills)
    }

    async fn get_balance(&self) -> ClientResult<f64> {
        let value = self
            .request(Method::GET, "/portfolio/balance", &[], None)
            .await?;
        let parsed: BalanceResponse = serde_json::from_value(value)
            .map_err(|e| ClientError::Transport(format!("malformed balance response: {}", e)))?;
        Ok(parsed.balance as f64 / 100.0)
    }

    async fn get_positions(&self) -> ClientResult<Vec<Position>> {
        let value = self
            .request(Method::GET, "/portfolio/positions", &[], None)
            .await?;
        let parsed: PositionsResponse = serde_json::from_value(value)
            .map_err(|e| ClientError::Transport(format!("malformed positions response: {}", e)))?;

        let positions = parsed
            .market_positions
            .into_iter()
            .filter(|p| p.position != 0)
            .map(|p| {
                let side = if p.position > 0 {
                    OrderSide::Yes
                } else {
                    OrderSide::No
                };
                let quantity = p.position.abs();
                let entry = if quantity > 0 {
                    p.market_exposure as f64 / quantity as f64
                } else {
                    0.0
                };
                Position::new(&p.ticker, side, quantity, entry)
            })
            .collect();
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orderbook_complement() {
        let api = ApiOrderbook {
            yes: vec![(48, 100), (47, 200)],
            no: vec![(48, 150)],
        };
        let book = api.into_orderbook();
        assert_eq!(book.best_bid(), Some(48));
        // NO bid at 48 becomes a YES ask at 52
        assert_eq!(book.best_ask(), Some(52));
        assert_eq!(book.best_ask_size(), 150);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_exchange_status("resting"), OrderStatus::Open);
        assert_eq!(map_exchange_status("executed"), OrderStatus::Filled);
        assert_eq!(map_exchange_status("canceled"), OrderStatus::Cancelled);
        assert_eq!(map_exchange_status("anything_else"), OrderStatus::Submitted);
    }
}
