//! Opportunity aggregation: fuse raw per-bookmaker alerts into one ranked,
//! actionable opportunity per (market_key, direction).

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use crate::models::{Alert, Confidence, Direction, Opportunity};

/// Group alerts by (market_key, direction) and build one opportunity per
/// group, ranked by edge_cents * sqrt(liquidity) * (1 + ln(1 + books)).
/// Deterministic: a fixed alert list always yields the same sorted output,
/// ties breaking by market_key then direction.
pub fn aggregate_opportunities(alerts: &[Alert]) -> Vec<Opportunity> {
    if alerts.is_empty() {
        return Vec::new();
    }

    // BTreeMap keeps group iteration deterministic.
    let mut groups: BTreeMap<(String, Direction), Vec<&Alert>> = BTreeMap::new();
    for alert in alerts {
        groups
            .entry((alert.market_key.clone(), alert.direction))
            .or_default()
            .push(alert);
    }

    let mut opportunities: Vec<Opportunity> = groups
        .into_iter()
        .map(|((market_key, direction), group)| build_opportunity(market_key, direction, &group))
        .collect();

    opportunities.sort_by(|a, b| {
        b.rank_score
            .partial_cmp(&a.rank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.market_key.cmp(&b.market_key))
            .then_with(|| a.direction.cmp(&b.direction))
    });

    debug!(
        "aggregated {} alerts into {} opportunities",
        alerts.len(),
        opportunities.len()
    );
    opportunities
}

fn build_opportunity(market_key: String, direction: Direction, group: &[&Alert]) -> Opportunity {
    let a0 = group[0];
    let exchange_price_cents = (a0.exchange_price * 100.0).round() as i64;
    let exchange_liquidity = a0.exchange_liquidity;
    let selection = &a0.selection;

    // Spread from the raw exchange snapshot when available
    let exchange_spread_cents = a0
        .raw_snapshot_refs
        .get("exchange")
        .and_then(|ex| {
            let bid = ex.get("yes_bid")?.as_f64()?;
            let ask = ex.get("yes_ask")?.as_f64()?;
            Some(((ask - bid) * 100.0).round() as i64)
        })
        .unwrap_or(0);

    // Book consensus: median of per-book no-vig probabilities
    let mut probs: Vec<f64> = group.iter().map(|a| a.book_p_no_vig).collect();
    let book_fair_prob = median(&mut probs);
    let book_count = group.len();

    // Best/worst book by edge
    let best = group
        .iter()
        .max_by(|a, b| a.edge_bps.partial_cmp(&b.edge_bps).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap();
    let worst = group
        .iter()
        .min_by(|a, b| a.edge_bps.partial_cmp(&b.edge_bps).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap();

    let best_name = pretty_book(&best.bookmaker);
    let worst_name = pretty_book(&worst.bookmaker);
    let best_odds = odds_str(best);
    let book_best = join_book(&best_name, &best_odds);
    let book_worst = join_book(&worst_name, &odds_str(worst));

    // Median edge
    let mut edges: Vec<f64> = group.iter().map(|a| a.edge_bps).collect();
    let edge_bps = median(&mut edges);
    let edge_cents = edge_bps / 100.0;

    let (exchange_action, hedge_action) = match direction {
        Direction::ExchangeRich => (
            format!("SELL {} YES @ {}c", selection, exchange_price_cents),
            format!("Bet {} ML on {} at {}", selection, best_name, best_odds),
        ),
        Direction::ExchangeCheap => (
            format!("BUY {} YES @ {}c", selection, exchange_price_cents),
            format!("Bet opposite of {} on {} at {}", selection, best_name, best_odds),
        ),
    };
    let hedge_odds = if best_odds.is_empty() {
        "-".to_string()
    } else {
        best_odds
    };

    // Edge in cents = cents per share; 100 shares x edge_cents cents = that
    // many dollars.
    let pnl_per_100_shares = edge_cents;

    let confidence = group
        .iter()
        .map(|a| a.confidence)
        .max()
        .unwrap_or(Confidence::Low);

    let rank_score = edge_cents
        * (exchange_liquidity.max(1) as f64).sqrt()
        * (1.0 + (1.0 + book_count as f64).ln());

    Opportunity {
        game_label: game_label(&market_key),
        exchange_url: exchange_url(&a0.exchange_contract_id),
        market_key,
        direction,
        exchange_action,
        exchange_ticker: a0.exchange_contract_id.clone(),
        exchange_price_cents,
        exchange_spread_cents,
        exchange_liquidity,
        book_fair_prob,
        book_count,
        book_best,
        book_worst,
        edge_cents,
        edge_bps,
        hedge_action,
        hedge_odds,
        pnl_per_100_shares,
        max_shares: exchange_liquidity,
        confidence,
        rank_score,
        timestamp: Utc::now(),
        raw_alert_count: group.len(),
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn pretty_book(bookmaker: &str) -> String {
    bookmaker
        .split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Odds string preserving the source format, read from the alert's raw
/// quote snapshot.
fn odds_str(alert: &Alert) -> String {
    let value = alert
        .raw_snapshot_refs
        .get("odds")
        .and_then(|odds| odds.get("odds_value"))
        .and_then(|v| v.as_f64());
    match value {
        Some(v) if v.abs() > 10.0 => format!("{:+.0}", v),
        Some(v) => format!("{:.2}", v),
        None => String::new(),
    }
}

fn join_book(name: &str, odds: &str) -> String {
    if odds.is_empty() {
        name.to_string()
    } else {
        format!("{} {}", name, odds)
    }
}

/// Readable label from a market key, e.g. `nba_20260207_houokc_okc` ->
/// "Houokc Okc". Registry keys carry game and side codes, not full names.
fn game_label(market_key: &str) -> String {
    let parts: Vec<&str> = market_key
        .split('_')
        .filter(|p| !p.chars().all(|c| c.is_ascii_digit()))
        .filter(|p| !matches!(*p, "nba" | "nfl" | "ncaab" | "game"))
        .collect();
    if parts.is_empty() {
        return market_key.replace('_', " ");
    }
    parts
        .iter()
        .map(|p| {
            let mut chars = p.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deep link to the exchange page for a contract.
fn exchange_url(ticker: &str) -> String {
    format!(
        "https://exchange.example.com/markets/{}",
        ticker.to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(
        market_key: &str,
        direction: Direction,
        bookmaker: &str,
        edge_bps: f64,
        liquidity: i64,
        confidence: Confidence,
    ) -> Alert {
        Alert {
            alert_id: format!("a-{}-{}", bookmaker, edge_bps),
            timestamp: Utc::now(),
            market_key: market_key.to_string(),
            direction,
            edge_pct: edge_bps / 100.0,
            edge_bps,
            confidence,
            confidence_score: 0.5,
            exchange_contract_id: "KXNBAGAME-26FEB07HOUOKC-OKC".into(),
            exchange_side: "YES".into(),
            exchange_price: 0.40,
            exchange_liquidity: liquidity,
            bookmaker: bookmaker.to_string(),
            selection: "Thunder".into(),
            book_p_no_vig: 0.40 + edge_bps / 10_000.0,
            notes: String::new(),
            raw_snapshot_refs: serde_json::json!({
                "exchange": {"yes_bid": 0.38, "yes_ask": 0.40},
                "odds": {"odds_value": -150.0},
            }),
            exchange_data_age_seconds: 1.0,
            book_data_age_seconds: 1.0,
        }
    }

    #[test]
    fn test_five_book_aggregation() {
        // S3: five CHEAP alerts with edges 900..2100 bps, liquidity 100.
        let alerts: Vec<Alert> = [
            ("draftkings", 900.0),
            ("fanduel", 1200.0),
            ("caesars", 1500.0),
            ("betmgm", 1800.0),
            ("pinnacle", 2100.0),
        ]
        .iter()
        .map(|(book, edge)| {
            alert("nba_20260207_houokc_okc", Direction::ExchangeCheap, book, *edge, 100, Confidence::Med)
        })
        .collect();

        let opportunities = aggregate_opportunities(&alerts);
        assert_eq!(opportunities.len(), 1);

        let opp = &opportunities[0];
        assert_eq!(opp.book_count, 5);
        assert!((opp.edge_bps - 1500.0).abs() < 1e-9);
        assert!((opp.edge_cents - 15.0).abs() < 1e-9);
        assert!(opp.book_best.starts_with("Pinnacle"));
        assert!(opp.book_worst.starts_with("Draftkings"));

        // rank = 15 * sqrt(100) * (1 + ln 6) ~ 418.8
        assert!((opp.rank_score - 418.8).abs() < 1.0, "rank was {}", opp.rank_score);
        assert_eq!(opp.max_shares, 100);
        assert!((opp.pnl_per_100_shares - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_direction_groups_are_separate() {
        let alerts = vec![
            alert("key-a", Direction::ExchangeCheap, "draftkings", 100.0, 50, Confidence::Low),
            alert("key-a", Direction::ExchangeRich, "fanduel", 100.0, 50, Confidence::Low),
        ];
        let opportunities = aggregate_opportunities(&alerts);
        assert_eq!(opportunities.len(), 2);
    }

    #[test]
    fn test_confidence_is_group_max() {
        let alerts = vec![
            alert("key-a", Direction::ExchangeCheap, "draftkings", 100.0, 50, Confidence::Low),
            alert("key-a", Direction::ExchangeCheap, "fanduel", 120.0, 50, Confidence::High),
            alert("key-a", Direction::ExchangeCheap, "caesars", 110.0, 50, Confidence::Med),
        ];
        let opportunities = aggregate_opportunities(&alerts);
        assert_eq!(opportunities[0].confidence, Confidence::High);
    }

    #[test]
    fn test_deterministic_ordering() {
        let alerts = vec![
            alert("key-b", Direction::ExchangeCheap, "draftkings", 100.0, 50, Confidence::Low),
            alert("key-a", Direction::ExchangeCheap, "fanduel", 100.0, 50, Confidence::Low),
        ];
        let first = aggregate_opportunities(&alerts);
        let second = aggregate_opportunities(&alerts);
        let keys_first: Vec<&str> = first.iter().map(|o| o.market_key.as_str()).collect();
        let keys_second: Vec<&str> = second.iter().map(|o| o.market_key.as_str()).collect();
        assert_eq!(keys_first, keys_second);
        // Equal rank scores break ties by market_key
        assert_eq!(keys_first, vec!["key-a", "key-b"]);
    }

    #[test]
    fn test_action_strings() {
        let cheap = aggregate_opportunities(&[alert(
            "key-a",
            Direction::ExchangeCheap,
            "draftkings",
            150.0,
            50,
            Confidence::Med,
        )]);
        assert!(cheap[0].exchange_action.starts_with("BUY Thunder YES @"));
        assert!(cheap[0].hedge_action.contains("opposite of Thunder"));
        assert_eq!(cheap[0].hedge_odds, "-150");

        let rich = aggregate_opportunities(&[alert(
            "key-a",
            Direction::ExchangeRich,
            "draftkings",
            150.0,
            50,
            Confidence::Med,
        )]);
        assert!(rich[0].exchange_action.starts_with("SELL Thunder YES @"));
        assert!(rich[0].hedge_action.starts_with("Bet Thunder ML"));
    }

    #[test]
    fn test_median_even_and_odd() {
        assert!((median(&mut [1.0, 3.0, 2.0]) - 2.0).abs() < 1e-12);
        assert!((median(&mut [1.0, 2.0, 3.0, 4.0]) - 2.5).abs() < 1e-12);
        assert_eq!(median(&mut []), 0.0);
    }

    #[test]
    fn test_spread_read_from_snapshot() {
        let opportunities = aggregate_opportunities(&[alert(
            "key-a",
            Direction::ExchangeCheap,
            "draftkings",
            150.0,
            50,
            Confidence::Med,
        )]);
        assert_eq!(opportunities[0].exchange_spread_cents, 2);
    }
}
