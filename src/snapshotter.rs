//! Orderbook snapshotter for building historical datasets.
//!
//! The exchange provides no historical orderbook data, so strategies and
//! the backtester run off snapshots we record ourselves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::clients::ExchangeClient;
use crate::models::{Contract, MarketSnapshot};
use crate::store::Repository;

/// Fixed recovery delay after a loop error.
const ERROR_BACKOFF_SECS: u64 = 60;

pub struct Snapshotter {
    client: Arc<dyn ExchangeClient>,
    repository: Arc<Repository>,
    interval_minutes: u64,

    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Snapshotter {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        repository: Arc<Repository>,
        interval_minutes: u64,
    ) -> Self {
        Self {
            client,
            repository,
            interval_minutes: interval_minutes.max(1),
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Snapshot a single contract. Fetches the orderbook when the contract
    /// doesn't already carry one.
    pub async fn snapshot_market(&self, market: &Contract) -> Result<Option<MarketSnapshot>> {
        let book = match &market.orderbook {
            Some(book) => book.clone(),
            None => match self.client.get_orderbook(&market.ticker).await? {
                Some(book) => book,
                None => {
                    warn!("no orderbook for {}, skipping snapshot", market.ticker);
                    return Ok(None);
                }
            },
        };

        let snapshot = MarketSnapshot::from_market(market, &book);
        self.repository.save_snapshot(&snapshot)?;

        debug!(
            "snapshot {}: mid={:?} spread={:?}",
            market.ticker, snapshot.mid, snapshot.spread
        );
        Ok(Some(snapshot))
    }

    /// Snapshot a batch; per-market failures are logged and skipped.
    pub async fn snapshot_markets(&self, markets: &[Contract]) -> Vec<MarketSnapshot> {
        let mut snapshots = Vec::new();
        for market in markets {
            match self.snapshot_market(market).await {
                Ok(Some(snapshot)) => snapshots.push(snapshot),
                Ok(None) => {}
                Err(e) => error!("snapshot failed for {}: {}", market.ticker, e),
            }
        }
        info!(
            "batch snapshot complete: {}/{} captured",
            snapshots.len(),
            markets.len()
        );
        snapshots
    }

    /// Snapshots for a ticker over the trailing `days`, oldest first.
    pub fn historical_snapshots(&self, ticker: &str, days: i64) -> Result<Vec<MarketSnapshot>> {
        let since = Utc::now() - ChronoDuration::days(days);
        self.repository.get_snapshots(ticker, since)
    }

    /// Start the background capture loop for a fixed ticker set.
    pub fn start_continuous(&mut self, tickers: Vec<String>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("snapshotter already running");
            return;
        }

        let client = Arc::clone(&self.client);
        let repository = Arc::clone(&self.repository);
        let running = Arc::clone(&self.running);
        let interval = Duration::from_secs(self.interval_minutes * 60);

        info!(
            "continuous snapshotting started: {} tickers every {} minutes",
            tickers.len(),
            self.interval_minutes
        );

        self.task = Some(tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let mut captured = 0usize;
                for ticker in &tickers {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    let result = async {
                        let market = client.get_market(ticker).await?;
                        let book = client.get_orderbook(ticker).await?;
                        Ok::<_, crate::clients::ClientError>((market, book))
                    }
                    .await;

                    match result {
                        Ok((Some(market), Some(book))) => {
                            let snapshot = MarketSnapshot::from_market(&market, &book);
                            if let Err(e) = repository.save_snapshot(&snapshot) {
                                error!("failed to persist snapshot for {}: {}", ticker, e);
                            } else {
                                captured += 1;
                            }
                        }
                        Ok(_) => debug!("{} not found or bookless, skipping", ticker),
                        Err(e) => {
                            error!("snapshot loop error for {}: {}", ticker, e);
                            sleep(Duration::from_secs(ERROR_BACKOFF_SECS)).await;
                        }
                    }
                }
                debug!("snapshot sweep: {} captured", captured);
                sleep(interval).await;
            }
        }));
    }

    /// Stop the background loop and wait for in-flight work to finish.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        info!("snapshotter stopped");
    }

    /// Delete snapshots past retention. Returns the deleted count.
    pub fn cleanup_old_snapshots(&self, retention_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(retention_days);
        let deleted = self.repository.delete_snapshots_before(cutoff)?;
        info!(
            "snapshot retention: deleted {} rows older than {}",
            deleted,
            cutoff.to_rfc3339()
        );
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::MockExchangeClient;

    fn snapshotter() -> Snapshotter {
        let client = Arc::new(MockExchangeClient::default());
        let repository = Arc::new(Repository::in_memory().unwrap());
        Snapshotter::new(client, repository, 5)
    }

    #[tokio::test]
    async fn test_snapshot_single_market() {
        let snapshotter = snapshotter();
        let market = snapshotter
            .client
            .get_market("TEST-TODAY-A")
            .await
            .unwrap()
            .unwrap();

        let snapshot = snapshotter.snapshot_market(&market).await.unwrap().unwrap();
        assert_eq!(snapshot.ticker, "TEST-TODAY-A");
        assert_eq!(snapshot.bid, Some(54));
        assert_eq!(snapshot.ask, Some(56));

        let history = snapshotter.historical_snapshots("TEST-TODAY-A", 1).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_batch_skips_unknown() {
        let snapshotter = snapshotter();
        let known = snapshotter
            .client
            .get_market("TEST-TODAY-A")
            .await
            .unwrap()
            .unwrap();
        let mut unknown = known.clone();
        unknown.ticker = "DOES-NOT-EXIST".to_string();
        unknown.orderbook = None;

        let snapshots = snapshotter.snapshot_markets(&[known, unknown]).await;
        assert_eq!(snapshots.len(), 1);
    }

    #[tokio::test]
    async fn test_retention_cleanup() {
        let snapshotter = snapshotter();
        let market = snapshotter
            .client
            .get_market("TEST-TODAY-A")
            .await
            .unwrap()
            .unwrap();
        snapshotter.snapshot_market(&market).await.unwrap();

        // Nothing old enough to delete
        assert_eq!(snapshotter.cleanup_old_snapshots(1).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_continuous_loop_stops_cleanly() {
        let mut snapshotter = snapshotter();
        snapshotter.start_continuous(vec!["TEST-TODAY-A".to_string()]);
        assert!(snapshotter.running.load(Ordering::SeqCst));
        snapshotter.stop().await;
        assert!(!snapshotter.running.load(Ordering::SeqCst));
    }
}
