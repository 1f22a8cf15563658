//! Scanner - compares exchange top-of-book against sportsbook odds and
//! emits alerts above threshold.
//!
//! Alert-only; aggregation into actionable opportunities lives in
//! `aggregate`, execution is the operator's call.

pub mod aggregate;

use chrono::Utc;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    Alert, Confidence, Direction, NormalizedProb, OddsFormat, OddsQuote, TopOfBook, VigMethod,
};
use crate::odds_math::{american_to_prob, decimal_to_prob, no_vig_two_way};

/// Per-cycle counters for silently dropped inputs. How the operator notices
/// data-quality gaps.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanStats {
    pub invalid_books: u64,
    pub stale_books: u64,
    pub stale_quotes: u64,
    pub unconvertible_quotes: u64,
    pub alerts_emitted: u64,
}

pub struct Scanner {
    /// Added to the ask when buying, subtracted from the bid when selling
    pub exchange_slippage_buffer: f64,
    /// Bookmaker no-vig probability is scaled by (1 - friction)
    pub sportsbook_friction: f64,
    pub min_edge_bps: f64,
    pub min_liquidity: i64,
    pub max_staleness_seconds: f64,

    pub stats: ScanStats,
}

impl Default for Scanner {
    fn default() -> Self {
        Self {
            exchange_slippage_buffer: 0.005,
            sportsbook_friction: 0.01,
            min_edge_bps: 50.0,
            min_liquidity: 10,
            max_staleness_seconds: 60.0,
            stats: ScanStats::default(),
        }
    }
}

impl Scanner {
    pub fn new(
        exchange_slippage_buffer: f64,
        sportsbook_friction: f64,
        min_edge_bps: f64,
        min_liquidity: i64,
        max_staleness_seconds: f64,
    ) -> Self {
        Self {
            exchange_slippage_buffer,
            sportsbook_friction,
            min_edge_bps,
            min_liquidity,
            max_staleness_seconds,
            stats: ScanStats::default(),
        }
    }

    /// Compare one mapped market's top-of-book against all relevant
    /// bookmaker quotes for the event + market type. Alerts are emitted in
    /// quote order; per-quote failures become silent drops with a counter
    /// bump.
    pub fn compare(
        &mut self,
        market_key: &str,
        tob: &TopOfBook,
        quotes: &[OddsQuote],
    ) -> Vec<Alert> {
        let now = Utc::now();
        let mut alerts = Vec::new();

        let exchange_age = tob.age_seconds(now);
        if exchange_age > self.max_staleness_seconds {
            self.stats.stale_books += 1;
            return alerts;
        }
        if !tob.is_valid() {
            self.stats.invalid_books += 1;
            return alerts;
        }

        // Both present when is_valid() holds.
        let (yes_bid, yes_ask) = match (tob.yes_bid, tob.yes_ask) {
            (Some(bid), Some(ask)) => (bid, ask),
            _ => return alerts,
        };

        let buy_price = (yes_ask + self.exchange_slippage_buffer).min(1.0);
        let sell_price = (yes_bid - self.exchange_slippage_buffer).max(0.0);

        for quote in quotes {
            let quote_age = quote.age_seconds(now);
            if quote_age > self.max_staleness_seconds {
                self.stats.stale_quotes += 1;
                continue;
            }

            let normalized = match self.normalize_odds(quote, quotes) {
                Some(normalized) => normalized,
                None => {
                    self.stats.unconvertible_quotes += 1;
                    continue;
                }
            };

            let adjusted_p = normalized.p_no_vig * (1.0 - self.sportsbook_friction);

            // Direction 1: exchange cheap (buy YES on the exchange)
            let edge_cheap_bps = (adjusted_p - buy_price) * 10_000.0;
            if edge_cheap_bps >= self.min_edge_bps && tob.yes_ask_size >= self.min_liquidity {
                alerts.push(self.build_alert(
                    market_key,
                    Direction::ExchangeCheap,
                    tob,
                    buy_price,
                    tob.yes_ask_size,
                    quote,
                    &normalized,
                    edge_cheap_bps,
                    exchange_age,
                    quote_age,
                ));
            }

            // Direction 2: exchange rich (sell YES on the exchange)
            let edge_rich_bps = (sell_price - adjusted_p) * 10_000.0;
            if edge_rich_bps >= self.min_edge_bps && tob.yes_bid_size >= self.min_liquidity {
                alerts.push(self.build_alert(
                    market_key,
                    Direction::ExchangeRich,
                    tob,
                    sell_price,
                    tob.yes_bid_size,
                    quote,
                    &normalized,
                    edge_rich_bps,
                    exchange_age,
                    quote_age,
                ));
            }
        }

        self.stats.alerts_emitted += alerts.len() as u64;
        debug!(
            "scanned {}: {} quotes -> {} alerts",
            market_key,
            quotes.len(),
            alerts.len()
        );
        alerts
    }

    /// Convert a quote to a no-vig probability. Two-way removal when the
    /// opposite selection from the same bookmaker is present, otherwise the
    /// raw implied probability with overround 1.
    fn normalize_odds(&self, target: &OddsQuote, all: &[OddsQuote]) -> Option<NormalizedProb> {
        let p_implied = convert_quote(target)?;

        let opposite = all.iter().find(|q| {
            q.bookmaker == target.bookmaker
                && q.event_id == target.event_id
                && q.market_type == target.market_type
                && q.selection != target.selection
        });

        let (p_no_vig, overround) = match opposite {
            Some(opp) => {
                let p_opposite = convert_quote(opp).unwrap_or(1.0 - p_implied);
                let (p_nv, _) = no_vig_two_way(p_implied, p_opposite).ok()?;
                (p_nv, p_implied + p_opposite)
            }
            None => (p_implied, 1.0),
        };

        Some(NormalizedProb {
            p_implied,
            p_no_vig,
            overround,
            method: VigMethod::Proportional,
            selection: target.selection.clone(),
            bookmaker: target.bookmaker.clone(),
            timestamp: target.timestamp,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_alert(
        &self,
        market_key: &str,
        direction: Direction,
        tob: &TopOfBook,
        exchange_price: f64,
        exchange_liquidity: i64,
        quote: &OddsQuote,
        normalized: &NormalizedProb,
        edge_bps: f64,
        exchange_age: f64,
        quote_age: f64,
    ) -> Alert {
        let (confidence, confidence_score) = self.compute_confidence(
            edge_bps,
            exchange_age,
            quote_age,
            exchange_liquidity,
            normalized.overround,
        );

        Alert {
            alert_id: Uuid::new_v4().to_string()[..8].to_string(),
            timestamp: Utc::now(),
            market_key: market_key.to_string(),
            direction,
            edge_pct: edge_bps / 100.0,
            edge_bps,
            confidence,
            confidence_score,
            exchange_contract_id: tob.contract_id.clone(),
            exchange_side: "YES".to_string(),
            exchange_price,
            exchange_liquidity,
            bookmaker: quote.bookmaker.clone(),
            selection: quote.selection.clone(),
            book_p_no_vig: normalized.p_no_vig,
            notes: format!("Overround: {:.4}", normalized.overround),
            raw_snapshot_refs: json!({
                "exchange": tob,
                "odds": quote,
                "normalized": normalized,
            }),
            exchange_data_age_seconds: exchange_age,
            book_data_age_seconds: quote_age,
        }
    }

    /// Additive confidence score. Larger edge, fresher data, deeper
    /// exchange liquidity, and lower vig all raise it.
    fn compute_confidence(
        &self,
        edge_bps: f64,
        exchange_age: f64,
        quote_age: f64,
        exchange_liquidity: i64,
        overround: f64,
    ) -> (Confidence, f64) {
        let mut score: f64 = 0.0;

        // Edge contribution (0.1 - 0.4)
        if edge_bps >= 200.0 {
            score += 0.4;
        } else if edge_bps >= 100.0 {
            score += 0.3;
        } else if edge_bps >= 50.0 {
            score += 0.2;
        } else {
            score += 0.1;
        }

        // Freshness contribution (0 - 0.3) on the older leg
        let max_age = exchange_age.max(quote_age);
        if max_age < 10.0 {
            score += 0.3;
        } else if max_age < 30.0 {
            score += 0.2;
        } else if max_age < 60.0 {
            score += 0.1;
        }

        // Liquidity contribution (0.05 - 0.2)
        if exchange_liquidity >= 100 {
            score += 0.2;
        } else if exchange_liquidity >= 50 {
            score += 0.15;
        } else if exchange_liquidity >= 20 {
            score += 0.1;
        } else {
            score += 0.05;
        }

        // Overround contribution (0 - 0.1): less vig, more reliable books
        if overround < 1.03 {
            score += 0.1;
        } else if overround < 1.05 {
            score += 0.05;
        }

        (Confidence::from_score(score), score)
    }
}

fn convert_quote(quote: &OddsQuote) -> Option<f64> {
    match quote.odds_format {
        OddsFormat::American => american_to_prob(quote.odds_value).ok(),
        OddsFormat::Decimal => decimal_to_prob(quote.odds_value).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tob(yes_bid: f64, bid_size: i64, yes_ask: f64, ask_size: i64) -> TopOfBook {
        TopOfBook {
            contract_id: "TEST-1".into(),
            yes_bid: Some(yes_bid),
            yes_ask: Some(yes_ask),
            yes_bid_size: bid_size,
            yes_ask_size: ask_size,
            no_bid: Some(1.0 - yes_ask),
            no_ask: Some(1.0 - yes_bid),
            no_bid_size: ask_size,
            no_ask_size: bid_size,
            timestamp: Utc::now(),
        }
    }

    fn quote(bookmaker: &str, selection: &str, format: OddsFormat, value: f64) -> OddsQuote {
        OddsQuote {
            source: "theoddsapi".into(),
            bookmaker: bookmaker.into(),
            event_id: "ev-1".into(),
            market_type: crate::models::MarketType::H2h,
            selection: selection.into(),
            odds_format: format,
            odds_value: value,
            point: None,
            timestamp: Utc::now(),
            event_title: String::new(),
            sport: String::new(),
            commence_time: None,
        }
    }

    fn scanner() -> Scanner {
        Scanner::default()
    }

    #[test]
    fn test_fair_market_produces_no_alert() {
        // S1: both sides -110, book 48/52. No-vig 0.5, adjusted 0.495,
        // buy 0.525 -> negative edge in both directions.
        let mut scanner = scanner();
        let quotes = vec![
            quote("draftkings", "A", OddsFormat::American, -110.0),
            quote("draftkings", "B", OddsFormat::American, -110.0),
        ];
        let alerts = scanner.compare("key", &tob(0.48, 100, 0.52, 100), &quotes);
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_exchange_cheap_alert_fires() {
        // S2: book 38/40, decimal 1.67 on A -> no-vig ~0.600, adjusted
        // ~0.594, buy 0.405, edge ~1890 bps, HIGH confidence.
        let mut scanner = scanner();
        let quotes = vec![
            quote("draftkings", "A", OddsFormat::Decimal, 1.67),
            quote("draftkings", "B", OddsFormat::Decimal, 2.50),
        ];
        let alerts = scanner.compare("key", &tob(0.38, 100, 0.40, 100), &quotes);

        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.direction, Direction::ExchangeCheap);
        assert!((alert.edge_bps - 1890.0).abs() < 20.0, "edge was {}", alert.edge_bps);
        assert_eq!(alert.confidence, Confidence::High);
        assert_eq!(alert.bookmaker, "draftkings");
        assert!((alert.book_p_no_vig - 0.600).abs() < 0.002);
    }

    #[test]
    fn test_stale_book_dropped() {
        let mut scanner = scanner();
        let mut stale = tob(0.38, 100, 0.40, 100);
        stale.timestamp = Utc::now() - Duration::seconds(120);
        let quotes = vec![quote("draftkings", "A", OddsFormat::Decimal, 1.67)];
        let alerts = scanner.compare("key", &stale, &quotes);
        assert!(alerts.is_empty());
        assert_eq!(scanner.stats.stale_books, 1);
    }

    #[test]
    fn test_stale_quote_dropped() {
        let mut scanner = scanner();
        let mut old_quote = quote("draftkings", "A", OddsFormat::Decimal, 1.67);
        old_quote.timestamp = Utc::now() - Duration::seconds(120);
        let alerts = scanner.compare("key", &tob(0.38, 100, 0.40, 100), &[old_quote]);
        assert!(alerts.is_empty());
        assert_eq!(scanner.stats.stale_quotes, 1);
    }

    #[test]
    fn test_zero_ask_size_never_alerts() {
        let mut scanner = scanner();
        let quotes = vec![quote("draftkings", "A", OddsFormat::Decimal, 1.5)];
        // Huge edge available but no size at the ask: invalid book.
        let alerts = scanner.compare("key", &tob(0.38, 100, 0.40, 0), &quotes);
        assert!(alerts.is_empty());
        assert_eq!(scanner.stats.invalid_books, 1);
    }

    #[test]
    fn test_one_sided_quote_falls_back_to_raw_implied() {
        let mut scanner = scanner();
        let quotes = vec![quote("draftkings", "A", OddsFormat::Decimal, 1.67)];
        let alerts = scanner.compare("key", &tob(0.38, 100, 0.40, 100), &quotes);
        assert_eq!(alerts.len(), 1);
        // Overround 1.0 recorded in the notes when no opposite side exists
        assert!(alerts[0].notes.contains("1.0000"));
    }

    #[test]
    fn test_at_most_one_direction_positive() {
        // With zero buffers and thresholds, bid < ask means the two edges
        // cannot both be positive on the same market.
        let mut scanner = Scanner::new(0.0, 0.0, 0.0, 0, 60.0);
        for book_prob in [1.2, 1.67, 2.0, 3.5] {
            let quotes = vec![quote("dk", "A", OddsFormat::Decimal, book_prob)];
            let alerts = scanner.compare("key", &tob(0.45, 100, 0.55, 100), &quotes);
            let cheap = alerts
                .iter()
                .filter(|a| a.direction == Direction::ExchangeCheap)
                .count();
            let rich = alerts
                .iter()
                .filter(|a| a.direction == Direction::ExchangeRich)
                .count();
            assert!(cheap + rich <= 1, "both directions fired at {}", book_prob);
        }
    }

    #[test]
    fn test_insufficient_bid_size_blocks_rich_only() {
        // Book very rich vs the sportsbook, but only 5 contracts at the bid.
        let mut scanner = scanner();
        let quotes = vec![
            quote("draftkings", "A", OddsFormat::Decimal, 3.0),
            quote("draftkings", "B", OddsFormat::Decimal, 1.36),
        ];
        let alerts = scanner.compare("key", &tob(0.60, 5, 0.62, 100), &quotes);
        assert!(alerts
            .iter()
            .all(|a| a.direction != Direction::ExchangeRich));
    }

    #[test]
    fn test_confidence_tiers() {
        let scanner = scanner();
        // Max everything: large edge, fresh, deep, low vig
        let (tier, score) = scanner.compute_confidence(250.0, 1.0, 1.0, 150, 1.02);
        assert_eq!(tier, Confidence::High);
        assert!((score - 1.0).abs() < 1e-9);

        // Small edge, old data, thin book, heavy vig
        let (tier, score) = scanner.compute_confidence(55.0, 55.0, 50.0, 15, 1.08);
        assert_eq!(tier, Confidence::Low);
        assert!(score < 0.50);
    }
}
