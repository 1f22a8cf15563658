//! SQLite persistence for orders, fills, snapshots, daily P&L, contracts,
//! odds quotes, and alerts.
//!
//! One connection behind a mutex; WAL mode so reads stay cheap while the
//! scanner appends. The idempotency_key unique index is the backstop that
//! makes duplicate order submission impossible across processes.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode};
use tracing::{debug, info};

use crate::models::{
    Alert, Contract, DailyPnl, Fill, MarketSnapshot, OddsQuote, Order, OrderSide, OrderStatus,
    OrderType,
};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS orders (
    id TEXT PRIMARY KEY,
    idempotency_key TEXT UNIQUE,
    exchange_order_id TEXT,
    ticker TEXT NOT NULL,
    side TEXT NOT NULL,
    order_type TEXT NOT NULL,
    price INTEGER NOT NULL,
    quantity INTEGER NOT NULL,
    strategy_name TEXT,
    signal_confidence REAL,
    expected_value REAL,
    status TEXT NOT NULL,
    filled_quantity INTEGER DEFAULT 0,
    average_fill_price REAL,
    created_at TEXT NOT NULL,
    submitted_at TEXT,
    filled_at TEXT,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS fills (
    id TEXT PRIMARY KEY,
    order_id TEXT NOT NULL,
    exchange_trade_id TEXT,
    ticker TEXT NOT NULL,
    side TEXT NOT NULL,
    price INTEGER NOT NULL,
    quantity INTEGER NOT NULL,
    notional REAL NOT NULL,
    fees REAL DEFAULT 0,
    ts TEXT NOT NULL,
    FOREIGN KEY (order_id) REFERENCES orders(id)
);

CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticker TEXT NOT NULL,
    ts TEXT NOT NULL,
    last_price INTEGER NOT NULL,
    bid INTEGER,
    ask INTEGER,
    mid REAL,
    spread INTEGER,
    volume_24h INTEGER,
    bid_depth INTEGER,
    ask_depth INTEGER,
    depth_imbalance REAL,
    orderbook_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_snapshots_ticker ON snapshots(ticker);
CREATE INDEX IF NOT EXISTS idx_snapshots_ts ON snapshots(ts);

CREATE TABLE IF NOT EXISTS daily_pnl (
    date TEXT PRIMARY KEY,
    realized REAL DEFAULT 0,
    unrealized REAL DEFAULT 0,
    fees REAL DEFAULT 0,
    placed INTEGER DEFAULT 0,
    filled INTEGER DEFAULT 0,
    won INTEGER DEFAULT 0,
    lost INTEGER DEFAULT 0,
    peak_exposure REAL DEFAULT 0,
    ending_exposure REAL DEFAULT 0,
    markets_traded TEXT
);

CREATE TABLE IF NOT EXISTS contracts (
    ticker TEXT PRIMARY KEY,
    event TEXT,
    title TEXT,
    outcome_side TEXT,
    close_time TEXT,
    status TEXT,
    last_price INTEGER,
    fetched_at TEXT,
    raw_json TEXT
);

CREATE TABLE IF NOT EXISTS quotes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT,
    bookmaker TEXT,
    event TEXT,
    market_type TEXT,
    selection TEXT,
    odds_format TEXT,
    odds_value REAL,
    ts TEXT NOT NULL,
    raw_json TEXT
);

CREATE TABLE IF NOT EXISTS alerts (
    alert_id TEXT PRIMARY KEY,
    ts TEXT NOT NULL,
    market_key TEXT,
    direction TEXT,
    edge_pct REAL,
    edge_bps REAL,
    confidence TEXT,
    confidence_score REAL,
    contract_id TEXT,
    bookmaker TEXT,
    raw_json TEXT
);
"#;

pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("failed to open database at {:?}", path.as_ref()))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply schema")?;
        info!("database ready at {:?}", path.as_ref());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory repository for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Orders ──────────────────────────────────────────────────────────

    /// Persist an order. A unique-constraint violation on the idempotency
    /// key means the order was already durably stored by an earlier
    /// submission; that is treated as success.
    pub fn save_order(&self, order: &Order) -> Result<()> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO orders (id, idempotency_key, exchange_order_id, ticker, side,
                order_type, price, quantity, strategy_name, signal_confidence,
                expected_value, status, filled_quantity, average_fill_price,
                created_at, submitted_at, filled_at, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
             ON CONFLICT(id) DO UPDATE SET
                exchange_order_id = excluded.exchange_order_id,
                status = excluded.status,
                filled_quantity = excluded.filled_quantity,
                average_fill_price = excluded.average_fill_price,
                submitted_at = excluded.submitted_at,
                filled_at = excluded.filled_at,
                error_message = excluded.error_message",
            params![
                order.id,
                order.idempotency_key,
                order.exchange_order_id,
                order.ticker,
                order.side.as_str(),
                order.order_type.as_str(),
                order.price,
                order.quantity,
                order.strategy_name,
                order.signal_confidence,
                order.expected_value,
                order.status.as_str(),
                order.filled_quantity,
                order.average_fill_price,
                order.created_at.to_rfc3339(),
                order.submitted_at.map(|t| t.to_rfc3339()),
                order.filled_at.map(|t| t.to_rfc3339()),
                order.error_message,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                debug!(
                    "order with idempotency key {} already persisted",
                    order.idempotency_key
                );
                Ok(())
            }
            Err(e) => Err(e).context("failed to save order"),
        }
    }

    pub fn get_order(&self, id: &str) -> Result<Option<Order>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, idempotency_key, exchange_order_id, ticker, side, order_type,
                    price, quantity, strategy_name, signal_confidence, expected_value,
                    status, filled_quantity, average_fill_price, created_at,
                    submitted_at, filled_at, error_message
             FROM orders WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(order_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn get_order_by_idempotency_key(&self, key: &str) -> Result<Option<Order>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, idempotency_key, exchange_order_id, ticker, side, order_type,
                    price, quantity, strategy_name, signal_confidence, expected_value,
                    status, filled_quantity, average_fill_price, created_at,
                    submitted_at, filled_at, error_message
             FROM orders WHERE idempotency_key = ?1",
        )?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(order_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn count_orders(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn save_fill(&self, fill: &Fill) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO fills (id, order_id, exchange_trade_id, ticker, side,
                price, quantity, notional, fees, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                fill.id,
                fill.order_id,
                fill.exchange_trade_id,
                fill.ticker,
                fill.side.as_str(),
                fill.price,
                fill.quantity,
                fill.notional,
                fill.fees,
                fill.timestamp.to_rfc3339(),
            ],
        )
        .context("failed to save fill")?;
        Ok(())
    }

    // ── Snapshots ───────────────────────────────────────────────────────

    pub fn save_snapshot(&self, snapshot: &MarketSnapshot) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO snapshots (ticker, ts, last_price, bid, ask, mid, spread,
                volume_24h, bid_depth, ask_depth, depth_imbalance, orderbook_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                snapshot.ticker,
                snapshot.timestamp.to_rfc3339(),
                snapshot.last_price,
                snapshot.bid,
                snapshot.ask,
                snapshot.mid,
                snapshot.spread,
                snapshot.volume_24h,
                snapshot.bid_depth,
                snapshot.ask_depth,
                snapshot.depth_imbalance,
                snapshot.orderbook_json,
            ],
        )
        .context("failed to save snapshot")?;
        Ok(())
    }

    /// Snapshots for a ticker since a cutoff, in chronological order.
    pub fn get_snapshots(
        &self,
        ticker: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MarketSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT ticker, ts, last_price, bid, ask, mid, spread, volume_24h,
                    bid_depth, ask_depth, depth_imbalance, orderbook_json
             FROM snapshots WHERE ticker = ?1 AND ts >= ?2 ORDER BY ts ASC",
        )?;
        let rows = stmt.query_map(params![ticker, since.to_rfc3339()], |row| {
            let ts: String = row.get(1)?;
            Ok(MarketSnapshot {
                ticker: row.get(0)?,
                timestamp: parse_rfc3339(&ts),
                last_price: row.get(2)?,
                bid: row.get(3)?,
                ask: row.get(4)?,
                mid: row.get(5)?,
                spread: row.get(6)?,
                volume_24h: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
                bid_depth: row.get::<_, Option<i64>>(8)?.unwrap_or(0),
                ask_depth: row.get::<_, Option<i64>>(9)?.unwrap_or(0),
                depth_imbalance: row.get::<_, Option<f64>>(10)?.unwrap_or(0.0),
                orderbook_json: row.get(11)?,
            })
        })?;
        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row?);
        }
        Ok(snapshots)
    }

    /// Delete snapshots older than the cutoff. Returns the deleted count.
    pub fn delete_snapshots_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM snapshots WHERE ts < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted)
    }

    // ── Daily P&L ───────────────────────────────────────────────────────

    pub fn save_daily_pnl(&self, pnl: &DailyPnl) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO daily_pnl (date, realized, unrealized, fees,
                placed, filled, won, lost, peak_exposure, ending_exposure, markets_traded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                pnl.date.format("%Y-%m-%d").to_string(),
                pnl.realized_pnl,
                pnl.unrealized_pnl,
                pnl.fees,
                pnl.trades_placed,
                pnl.trades_filled,
                pnl.trades_won,
                pnl.trades_lost,
                pnl.peak_exposure,
                pnl.ending_exposure,
                serde_json::to_string(&pnl.markets_traded)?,
            ],
        )
        .context("failed to save daily pnl")?;
        Ok(())
    }

    pub fn get_daily_pnl(&self, date: NaiveDate) -> Result<Option<DailyPnl>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT date, realized, unrealized, fees, placed, filled, won, lost,
                    peak_exposure, ending_exposure, markets_traded
             FROM daily_pnl WHERE date = ?1",
        )?;
        let mut rows = stmt.query(params![date.format("%Y-%m-%d").to_string()])?;
        match rows.next()? {
            Some(row) => {
                let markets_json: Option<String> = row.get(10)?;
                Ok(Some(DailyPnl {
                    date,
                    realized_pnl: row.get(1)?,
                    unrealized_pnl: row.get(2)?,
                    fees: row.get(3)?,
                    trades_placed: row.get(4)?,
                    trades_filled: row.get(5)?,
                    trades_won: row.get(6)?,
                    trades_lost: row.get(7)?,
                    peak_exposure: row.get(8)?,
                    ending_exposure: row.get(9)?,
                    markets_traded: markets_json
                        .and_then(|j| serde_json::from_str(&j).ok())
                        .unwrap_or_default(),
                }))
            }
            None => Ok(None),
        }
    }

    // ── Contracts & quotes ──────────────────────────────────────────────

    pub fn save_contract(&self, contract: &Contract) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO contracts (ticker, event, title, outcome_side,
                close_time, status, last_price, fetched_at, raw_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                contract.ticker,
                contract.event_ticker,
                contract.title,
                "YES",
                contract.close_time.map(|t| t.to_rfc3339()),
                contract.status,
                contract.last_price,
                Utc::now().to_rfc3339(),
                serde_json::to_string(contract)?,
            ],
        )
        .context("failed to save contract")?;
        Ok(())
    }

    pub fn count_contracts(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM contracts", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn save_quote(&self, quote: &OddsQuote) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO quotes (source, bookmaker, event, market_type, selection,
                odds_format, odds_value, ts, raw_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                quote.source,
                quote.bookmaker,
                quote.event_id,
                quote.market_type.as_str(),
                quote.selection,
                quote.odds_format.as_str(),
                quote.odds_value,
                quote.timestamp.to_rfc3339(),
                serde_json::to_string(quote)?,
            ],
        )
        .context("failed to save quote")?;
        Ok(())
    }

    // ── Alerts ──────────────────────────────────────────────────────────

    pub fn save_alert(&self, alert: &Alert) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO alerts (alert_id, ts, market_key, direction,
                edge_pct, edge_bps, confidence, confidence_score, contract_id,
                bookmaker, raw_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                alert.alert_id,
                alert.timestamp.to_rfc3339(),
                alert.market_key,
                alert.direction.as_str(),
                alert.edge_pct,
                alert.edge_bps,
                alert.confidence.as_str(),
                alert.confidence_score,
                alert.exchange_contract_id,
                alert.bookmaker,
                serde_json::to_string(alert)?,
            ],
        )
        .context("failed to save alert")?;
        Ok(())
    }

    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<Alert>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT raw_json FROM alerts ORDER BY ts DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let json: String = row.get(0)?;
            Ok(json)
        })?;
        let mut alerts = Vec::new();
        for row in rows {
            if let Ok(alert) = serde_json::from_str::<Alert>(&row?) {
                alerts.push(alert);
            }
        }
        Ok(alerts)
    }
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn order_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Order> {
    let side: String = row.get(4)?;
    let order_type: String = row.get(5)?;
    let status: String = row.get(11)?;
    let created_at: String = row.get(14)?;
    let submitted_at: Option<String> = row.get(15)?;
    let filled_at: Option<String> = row.get(16)?;
    Ok(Order {
        id: row.get(0)?,
        idempotency_key: row.get(1)?,
        exchange_order_id: row.get(2)?,
        ticker: row.get(3)?,
        side: OrderSide::parse(&side).unwrap_or(OrderSide::Yes),
        order_type: OrderType::parse(&order_type).unwrap_or(OrderType::Limit),
        price: row.get(6)?,
        quantity: row.get(7)?,
        strategy_name: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        signal_confidence: row.get::<_, Option<f64>>(9)?.unwrap_or(0.0),
        expected_value: row.get::<_, Option<f64>>(10)?.unwrap_or(0.0),
        status: OrderStatus::parse(&status).unwrap_or(OrderStatus::Pending),
        filled_quantity: row.get::<_, Option<i64>>(12)?.unwrap_or(0),
        average_fill_price: row.get(13)?,
        created_at: parse_rfc3339(&created_at),
        submitted_at: submitted_at.as_deref().map(parse_rfc3339),
        filled_at: filled_at.as_deref().map(parse_rfc3339),
        error_message: row.get(17)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, Direction};
    use chrono::Duration;

    fn repo() -> Repository {
        Repository::in_memory().unwrap()
    }

    fn sample_order(key: &str) -> Order {
        let mut order = Order::new("TEST-1", OrderSide::Yes, OrderType::Limit, 55, 10);
        order.idempotency_key = key.to_string();
        order
    }

    #[test]
    fn test_order_round_trip() {
        let repo = repo();
        let order = sample_order("2026-02-07:TEST-1:mispricing_v1:yes");
        repo.save_order(&order).unwrap();

        let loaded = repo.get_order(&order.id).unwrap().unwrap();
        assert_eq!(loaded.ticker, "TEST-1");
        assert_eq!(loaded.side, OrderSide::Yes);
        assert_eq!(loaded.price, 55);
        assert_eq!(loaded.status, OrderStatus::Pending);
    }

    #[test]
    fn test_duplicate_idempotency_key_is_success() {
        let repo = repo();
        let first = sample_order("dup-key");
        repo.save_order(&first).unwrap();

        // A different order id with the same idempotency key hits the unique
        // constraint; that must read as success for the stored order.
        let second = sample_order("dup-key");
        assert_ne!(first.id, second.id);
        repo.save_order(&second).unwrap();

        assert_eq!(repo.count_orders().unwrap(), 1);
        let stored = repo
            .get_order_by_idempotency_key("dup-key")
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, first.id);
    }

    #[test]
    fn test_snapshot_history_and_retention() {
        let repo = repo();
        let now = Utc::now();
        for i in 0..5 {
            let snap = MarketSnapshot {
                ticker: "TEST-1".into(),
                timestamp: now - Duration::hours(5 - i),
                last_price: 50 + i,
                bid: Some(49),
                ask: Some(51),
                mid: Some(50.0),
                spread: Some(2),
                volume_24h: 100,
                bid_depth: 50,
                ask_depth: 50,
                depth_imbalance: 0.0,
                orderbook_json: None,
            };
            repo.save_snapshot(&snap).unwrap();
        }

        let history = repo
            .get_snapshots("TEST-1", now - Duration::hours(10))
            .unwrap();
        assert_eq!(history.len(), 5);
        // Chronological order
        assert!(history[0].timestamp < history[4].timestamp);

        let deleted = repo
            .delete_snapshots_before(now - Duration::hours(3))
            .unwrap();
        assert_eq!(deleted, 2);
        let remaining = repo
            .get_snapshots("TEST-1", now - Duration::hours(10))
            .unwrap();
        assert_eq!(remaining.len(), 3);
    }

    #[test]
    fn test_daily_pnl_round_trip() {
        let repo = repo();
        let date = NaiveDate::from_ymd_opt(2026, 2, 7).unwrap();
        let mut pnl = DailyPnl::new(date);
        pnl.realized_pnl = 12.5;
        pnl.trades_placed = 4;
        pnl.markets_traded = vec!["A".into(), "B".into()];
        repo.save_daily_pnl(&pnl).unwrap();

        let loaded = repo.get_daily_pnl(date).unwrap().unwrap();
        assert!((loaded.realized_pnl - 12.5).abs() < 1e-12);
        assert_eq!(loaded.trades_placed, 4);
        assert_eq!(loaded.markets_traded, vec!["A", "B"]);
    }

    #[test]
    fn test_alert_round_trip() {
        let repo = repo();
        let alert = Alert {
            alert_id: "abc12345".into(),
            timestamp: Utc::now(),
            market_key: "nba_20260207_houokc_okc".into(),
            direction: Direction::ExchangeCheap,
            edge_pct: 2.5,
            edge_bps: 250.0,
            confidence: Confidence::High,
            confidence_score: 0.8,
            exchange_contract_id: "TEST-1".into(),
            exchange_side: "YES".into(),
            exchange_price: 0.40,
            exchange_liquidity: 100,
            bookmaker: "draftkings".into(),
            selection: "Thunder".into(),
            book_p_no_vig: 0.43,
            notes: String::new(),
            raw_snapshot_refs: serde_json::Value::Null,
            exchange_data_age_seconds: 1.0,
            book_data_age_seconds: 2.0,
        };
        repo.save_alert(&alert).unwrap();

        let alerts = repo.recent_alerts(10).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].market_key, "nba_20260207_houokc_okc");
        assert_eq!(alerts[0].direction, Direction::ExchangeCheap);
    }

    #[test]
    fn test_persist_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let repo = Repository::open(&path).unwrap();
            repo.save_order(&sample_order("k1")).unwrap();
        }
        let repo = Repository::open(&path).unwrap();
        assert_eq!(repo.count_orders().unwrap(), 1);
    }
}
