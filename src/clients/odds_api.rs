//! Odds aggregator client.
//!
//! Fetches odds from many bookmakers through an aggregator API. Read-only,
//! no execution. The free tier is tiny, so requests are paced to a
//! conservative per-second budget.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::clients::{ClientError, ClientResult};
use crate::models::{MarketType, OddsFormat, OddsQuote};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 10_000;

pub struct OddsApiClient {
    client: Client,
    base_url: String,
    api_key: String,
    min_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl OddsApiClient {
    pub fn new(api_key: &str, base_url: &str, requests_per_second: f64) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("edgebot/0.1")
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            min_delay: Duration::from_secs_f64(1.0 / requests_per_second.max(0.1)),
            last_request: Mutex::new(None),
        })
    }

    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_delay {
                sleep(self.min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> ClientResult<serde_json::Value> {
        let mut backoff = INITIAL_BACKOFF_MS;
        let mut attempt = 0;

        while attempt < MAX_RETRIES {
            self.throttle().await;

            let url = format!("{}{}", self.base_url, path);
            let mut request = self.client.get(&url).query(&[("apiKey", &self.api_key)]);
            if !query.is_empty() {
                request = request.query(query);
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
                    if status == StatusCode::UNAUTHORIZED {
                        return Err(ClientError::Auth("odds API key rejected".to_string()));
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(5);
                        warn!("odds API rate limited, sleeping {}s", retry_after);
                        sleep(Duration::from_secs(retry_after)).await;
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    return Err(ClientError::UpstreamBusiness {
                        status: status.as_u16(),
                        reason: text,
                    });
                }
                Err(e) => {
                    warn!("odds API request failed (attempt {}): {}", attempt + 1, e);
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

    /// List available sport keys.
    pub async fn list_sports(&self) -> ClientResult<Vec<serde_json::Value>> {
        let value = self.get("/sports", &[]).await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::Transport(format!("malformed sports response: {}", e)))
    }

    /// List upcoming events for a sport.
    pub async fn list_events(&self, sport: &str) -> ClientResult<Vec<RawEvent>> {
        let path = format!("/sports/{}/events", sport);
        let value = self.get(&path, &[]).await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::Transport(format!("malformed events response: {}", e)))
    }

    /// Get odds for all events in a sport.
    pub async fn get_odds(
        &self,
        sport: &str,
        regions: &str,
        markets: &str,
        odds_format: &str,
        bookmakers: Option<&str>,
    ) -> ClientResult<Vec<RawEvent>> {
        let path = format!("/sports/{}/odds", sport);
        let mut query: Vec<(&str, String)> = vec![
            ("regions", regions.to_string()),
            ("markets", markets.to_string()),
            ("oddsFormat", odds_format.to_string()),
        ];
        if let Some(books) = bookmakers {
            query.push(("bookmakers", books.to_string()));
        }
        let value = self.get(&path, &query).await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::Transport(format!("malformed odds response: {}", e)))
    }

    /// Flatten raw aggregator events into quote records. Unknown market
    /// types and missing prices are skipped.
    pub fn parse_odds_to_quotes(&self, raw_events: &[RawEvent]) -> Vec<OddsQuote> {
        let now = chrono::Utc::now();
        let mut quotes = Vec::new();

        for event in raw_events {
            let event_title = match (&event.away_team, &event.home_team) {
                (Some(away), Some(home)) if !away.is_empty() && !home.is_empty() => {
                    format!("{} @ {}", away, home)
                }
                _ => String::new(),
            };

            for bookmaker in &event.bookmakers {
                for market in &bookmaker.markets {
                    let market_type = match MarketType::parse(&market.key) {
                        Some(mt) => mt,
                        None => continue,
                    };
                    for outcome in &market.outcomes {
                        let price = match outcome.price {
                            Some(p) if p != 0.0 => p,
                            _ => continue,
                        };
                        // Aggregators quote American as signed whole numbers;
                        // anything with |price| <= 10 reads as decimal odds.
                        let odds_format = if price.abs() > 10.0 {
                            OddsFormat::American
                        } else {
                            OddsFormat::Decimal
                        };
                        quotes.push(OddsQuote {
                            source: "theoddsapi".to_string(),
                            bookmaker: bookmaker.key.clone(),
                            event_id: event.id.clone(),
                            market_type,
                            selection: outcome.name.clone(),
                            odds_format,
                            odds_value: price,
                            point: outcome.point,
                            timestamp: now,
                            event_title: event_title.clone(),
                            sport: event.sport_key.clone().unwrap_or_default(),
                            commence_time: event.commence_time,
                        });
                    }
                }
            }
        }

        quotes
    }
}

/// Raw event as returned by the aggregator.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub sport_key: Option<String>,
    pub commence_time: Option<chrono::DateTime<chrono::Utc>>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    #[serde(default)]
    pub bookmakers: Vec<RawBookmaker>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBookmaker {
    pub key: String,
    #[serde(default)]
    pub markets: Vec<RawMarket>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMarket {
    pub key: String,
    #[serde(default)]
    pub outcomes: Vec<RawOutcome>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOutcome {
    pub name: String,
    pub price: Option<f64>,
    pub point: Option<f64>,
}
