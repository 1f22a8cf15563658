//! End-to-end tests: scanner pipeline into the store, and the paper
//! trading path through risk, orders, and persistence on a real database
//! file.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use edgebot::clients::MockExchangeClient;
use edgebot::config::{Config, TradingMode};
use edgebot::models::{
    Confidence, Direction, MarketType, OddsFormat, OddsQuote, OrderSide, OrderStatus,
    StrategySignal, TopOfBook,
};
use edgebot::orders::OrderManager;
use edgebot::risk::RiskManager;
use edgebot::scanner::aggregate::aggregate_opportunities;
use edgebot::scanner::Scanner;
use edgebot::store::Repository;

fn quote(bookmaker: &str, selection: &str, value: f64) -> OddsQuote {
    OddsQuote {
        source: "theoddsapi".into(),
        bookmaker: bookmaker.into(),
        event_id: "ev-1".into(),
        market_type: MarketType::H2h,
        selection: selection.into(),
        odds_format: OddsFormat::Decimal,
        odds_value: value,
        point: None,
        timestamp: Utc::now(),
        event_title: "Rockets @ Thunder".into(),
        sport: "basketball_nba".into(),
        commence_time: None,
    }
}

fn top_of_book() -> TopOfBook {
    TopOfBook {
        contract_id: "KXNBAGAME-26FEB07HOUOKC-OKC".into(),
        yes_bid: Some(0.38),
        yes_ask: Some(0.40),
        yes_bid_size: 100,
        yes_ask_size: 100,
        no_bid: Some(0.60),
        no_ask: Some(0.62),
        no_bid_size: 100,
        no_ask_size: 100,
        timestamp: Utc::now(),
    }
}

#[test]
fn scan_pipeline_persists_ranked_opportunities() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::open(dir.path().join("scan.db")).unwrap();

    // Mispriced market across three books
    let quotes = vec![
        quote("draftkings", "Thunder", 1.67),
        quote("draftkings", "Rockets", 2.50),
        quote("fanduel", "Thunder", 1.60),
        quote("fanduel", "Rockets", 2.60),
        quote("pinnacle", "Thunder", 1.70),
        quote("pinnacle", "Rockets", 2.45),
    ];

    let mut scanner = Scanner::default();
    let alerts = scanner.compare("nba_20260207_houokc_okc", &top_of_book(), &quotes);
    assert!(!alerts.is_empty());
    assert!(alerts
        .iter()
        .all(|a| a.direction == Direction::ExchangeCheap));

    for alert in &alerts {
        repo.save_alert(alert).unwrap();
    }
    let stored = repo.recent_alerts(50).unwrap();
    assert_eq!(stored.len(), alerts.len());

    let opportunities = aggregate_opportunities(&alerts);
    assert_eq!(opportunities.len(), 1);
    let opp = &opportunities[0];
    assert_eq!(opp.book_count, 3);
    assert_eq!(opp.max_shares, 100);
    assert!(opp.confidence >= Confidence::Med);
    assert!(opp.exchange_action.starts_with("BUY"));
    assert!(opp.rank_score > 0.0);
}

fn tradeable_signal(ticker: &str) -> StrategySignal {
    let mut signal = StrategySignal::no_trade("mispricing_v1", ticker, 0.5, "");
    signal.side = Some(OrderSide::Yes);
    signal.confidence = 0.8;
    signal.fair_probability = 0.6;
    signal.market_probability = 0.5;
    signal.edge = 0.1;
    signal.expected_value = 0.05;
    signal.entry_price = Some(50);
    signal
}

#[tokio::test]
async fn paper_trading_is_idempotent_across_managers() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("trade.db");

    let mut config = Config::default();
    config.mode = TradingMode::Paper;

    let repository = Arc::new(Repository::open(&db_path).unwrap());
    let client = Arc::new(MockExchangeClient::always_fill(1_000.0));
    let mut risk = RiskManager::new(config.clone());
    risk.reset_daily_state();
    let risk = Arc::new(Mutex::new(risk));

    let manager = OrderManager::new(
        Arc::clone(&client) as Arc<dyn edgebot::clients::ExchangeClient>,
        Arc::clone(&risk),
        Arc::clone(&repository),
        config.clone(),
    );

    let signal = tradeable_signal("XYZ-1");
    let first = manager.process_signal(&signal, None).await.unwrap();
    assert_eq!(first.unwrap().status, OrderStatus::Filled);

    // Same-day duplicate through the same manager is dropped.
    assert!(manager.process_signal(&signal, None).await.unwrap().is_none());
    assert_eq!(repository.count_orders().unwrap(), 1);

    // A fresh manager over the same database: the in-memory key set is new,
    // but the unique index keeps the store at one row.
    let mut risk2 = RiskManager::new(config.clone());
    risk2.reset_daily_state();
    let manager2 = OrderManager::new(
        client,
        Arc::new(Mutex::new(risk2)),
        Arc::clone(&repository),
        config,
    );
    let _ = manager2.process_signal(&signal, None).await.unwrap();
    assert_eq!(repository.count_orders().unwrap(), 1);
}
