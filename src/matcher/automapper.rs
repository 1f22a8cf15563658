//! Auto-mapper: match exchange game-winner tickers to aggregator events by
//! team name.
//!
//! Game-winner tickers look like `KXNBAGAME-26FEB07HOUOKC-OKC`: series
//! prefix, a YYMMMDD date, two concatenated team codes, then a side code
//! equal to one of them. Events match when one team name contains a keyword
//! of code A and the other a keyword of code B. Registry writes are
//! temp-file + rename so a crash never leaves a half-written file.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::clients::odds_api::RawEvent;
use crate::matcher::{AggregatorMapping, ExchangeMapping, MappingRegistry, MarketMapping};
use crate::models::Contract;

/// Aggregator sport key -> exchange game-winner series.
pub fn series_for_sport(sport: &str) -> Option<&'static str> {
    match sport {
        "basketball_nba" => Some("KXNBAGAME"),
        "americanfootball_nfl" => Some("KXNFLGAME"),
        "basketball_ncaab" => Some("KXNCAABGAME"),
        _ => None,
    }
}

/// Exchange team code -> keyword substrings seen in aggregator team names.
/// Codes shared between leagues carry both keyword sets.
fn team_keywords(code: &str) -> &'static [&'static str] {
    match code {
        "ATL" => &["Atlanta", "Hawks", "Falcons"],
        "BKN" => &["Brooklyn", "Nets"],
        "BOS" => &["Boston", "Celtics"],
        "CHA" => &["Charlotte", "Hornets"],
        "CHI" => &["Chicago", "Bulls", "Bears"],
        "CLE" => &["Cleveland", "Cavaliers", "Browns"],
        "DAL" => &["Dallas", "Mavericks", "Cowboys"],
        "DEN" => &["Denver", "Nuggets", "Broncos"],
        "DET" => &["Detroit", "Pistons", "Lions"],
        "GSW" => &["Golden State", "Warriors", "GS "],
        "HOU" => &["Houston", "Rockets", "Texans"],
        "IND" => &["Indiana", "Pacers", "Indianapolis", "Colts"],
        "LAC" => &["LA Clippers", "Clippers", "Los Angeles Chargers", "Chargers"],
        "LAL" => &["Lakers", "Los Angeles Lakers"],
        "MEM" => &["Memphis", "Grizzlies"],
        "MIA" => &["Miami", "Heat", "Dolphins"],
        "MIL" => &["Milwaukee", "Bucks"],
        "MIN" => &["Minnesota", "Timberwolves", "Vikings"],
        "NOP" => &["New Orleans", "Pelicans"],
        "NYK" => &["New York", "Knicks"],
        "OKC" => &["Oklahoma City", "Thunder"],
        "ORL" => &["Orlando", "Magic"],
        "PHI" => &["Philadelphia", "76ers", "Sixers", "Eagles"],
        "PHX" => &["Phoenix", "Suns"],
        "POR" => &["Portland", "Trail Blazers", "Blazers"],
        "SAC" => &["Sacramento", "Kings"],
        "SAS" => &["San Antonio", "Spurs"],
        "TOR" => &["Toronto", "Raptors"],
        "UTA" => &["Utah", "Jazz"],
        "WAS" => &["Washington", "Wizards", "Commanders"],
        // NFL-only codes
        "SEA" => &["Seattle", "Seahawks"],
        "NE" => &["New England", "Patriots"],
        "KC" => &["Kansas City", "Chiefs"],
        "SF" => &["San Francisco", "49ers"],
        "BUF" => &["Buffalo", "Bills"],
        "BAL" => &["Baltimore", "Ravens"],
        "CIN" => &["Cincinnati", "Bengals"],
        "JAX" => &["Jacksonville", "Jaguars"],
        "LV" => &["Las Vegas", "Raiders"],
        "NYJ" => &["New York Jets", "Jets"],
        "NYG" => &["New York Giants", "Giants"],
        "PIT" => &["Pittsburgh", "Steelers"],
        "LAR" => &["Los Angeles Rams", "Rams"],
        "TB" => &["Tampa Bay", "Buccaneers"],
        "TEN" => &["Tennessee", "Titans"],
        "GB" => &["Green Bay", "Packers"],
        "CAR" => &["Carolina", "Panthers"],
        "NO" => &["New Orleans", "Saints"],
        _ => &[],
    }
}

fn team_matches(code: &str, team_name: &str) -> bool {
    if team_name.is_empty() {
        return false;
    }
    let keywords = team_keywords(code);
    let name_lower = team_name.to_lowercase();
    if keywords.is_empty() {
        return name_lower.contains(&code.to_lowercase());
    }
    keywords.iter().any(|kw| name_lower.contains(&kw.to_lowercase()))
}

/// Parsed pieces of a game-winner ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTicker {
    pub date_part: String,
    pub game_code: String,
    pub side_code: String,
}

/// Parse `SERIES-26FEB07HOUOKC-OKC`. Returns None when the shape is
/// unrecognized; such tickers are skipped silently by the mapper.
pub fn parse_game_ticker(ticker: &str) -> Option<ParsedTicker> {
    let parts: Vec<&str> = ticker.split('-').collect();
    if parts.len() < 3 {
        return None;
    }
    let date_game = parts[1];
    let side_code = parts[2];
    if date_game.len() < 8 {
        return None;
    }
    let date_part = &date_game[..7];
    let game_code = &date_game[7..];
    if game_code.len() < 4 {
        return None;
    }
    Some(ParsedTicker {
        date_part: date_part.to_string(),
        game_code: game_code.to_string(),
        side_code: side_code.to_string(),
    })
}

/// Split a game code into its two team codes. 6 letters = two 3-letter
/// codes, 4 letters = two 2-letter codes.
pub fn game_codes(game_code: &str) -> Option<(String, String)> {
    match game_code.len() {
        6 => Some((game_code[..3].to_string(), game_code[3..].to_string())),
        4 => Some((game_code[..2].to_string(), game_code[2..].to_string())),
        _ => None,
    }
}

/// If (home, away) matches (code_a, code_b), return the team names ordered
/// as (name_for_a, name_for_b).
fn match_event_to_codes(
    home_team: &str,
    away_team: &str,
    code_a: &str,
    code_b: &str,
) -> Option<(String, String)> {
    if team_matches(code_a, home_team) && team_matches(code_b, away_team) {
        return Some((home_team.to_string(), away_team.to_string()));
    }
    if team_matches(code_a, away_team) && team_matches(code_b, home_team) {
        return Some((away_team.to_string(), home_team.to_string()));
    }
    None
}

fn month_number(mmm: &str) -> &'static str {
    match mmm {
        "JAN" => "01",
        "FEB" => "02",
        "MAR" => "03",
        "APR" => "04",
        "MAY" => "05",
        "JUN" => "06",
        "JUL" => "07",
        "AUG" => "08",
        "SEP" => "09",
        "OCT" => "10",
        "NOV" => "11",
        "DEC" => "12",
        _ => "01",
    }
}

/// Stable registry key, e.g. `nba_20260207_houokc_okc`.
pub fn market_key_for(ticker: &str, parsed: &ParsedTicker) -> String {
    // Normalize 26FEB07 -> 20260207
    let date = &parsed.date_part;
    let date_str = if date.len() == 7 && date[..2].chars().all(|c| c.is_ascii_digit()) {
        let year = format!("20{}", &date[..2]);
        let month = month_number(&date[2..5]);
        let day = &date[5..7];
        format!("{}{}{}", year, month, day)
    } else {
        "20260101".to_string()
    };

    let prefix = if ticker.contains("NBA") {
        "nba"
    } else if ticker.contains("NFL") {
        "nfl"
    } else if ticker.contains("NCAAB") {
        "ncaab"
    } else {
        "game"
    };

    format!(
        "{}_{}_{}_{}",
        prefix,
        date_str,
        parsed.game_code.to_lowercase(),
        parsed.side_code.to_lowercase()
    )
}

/// Build mapping entries by joining exchange contracts against aggregator
/// events on team names. Pure; fetching and merging live in `auto_map`.
pub fn build_mapping_entries(
    contracts: &[Contract],
    events: &[RawEvent],
    series: &str,
) -> Vec<MarketMapping> {
    let mut mappings = Vec::new();
    let mut seen_contracts = std::collections::HashSet::new();

    for contract in contracts {
        let ticker = &contract.ticker;
        if !ticker.starts_with(series) || seen_contracts.contains(ticker) {
            continue;
        }
        let parsed = match parse_game_ticker(ticker) {
            Some(parsed) => parsed,
            None => continue,
        };
        let (code_a, code_b) = match game_codes(&parsed.game_code) {
            Some(codes) => codes,
            None => continue,
        };

        for event in events {
            let home = event.home_team.as_deref().unwrap_or("");
            let away = event.away_team.as_deref().unwrap_or("");
            let (name_a, name_b) = match match_event_to_codes(home, away, &code_a, &code_b) {
                Some(names) => names,
                None => continue,
            };
            let selection = if parsed.side_code.eq_ignore_ascii_case(&code_a) {
                name_a
            } else {
                name_b
            };
            mappings.push(MarketMapping {
                market_key: market_key_for(ticker, &parsed),
                exchange: ExchangeMapping {
                    contract_id: ticker.clone(),
                    side: "YES".to_string(),
                },
                aggregator: AggregatorMapping {
                    event_id: event.id.clone(),
                    market_type: "h2h".to_string(),
                    selection,
                },
            });
            seen_contracts.insert(ticker.clone());
            break;
        }
    }

    mappings
}

/// Merge freshly built mappings with the existing registry: rows whose
/// contract was re-matched are replaced, the rest are preserved.
pub fn merge_mappings(
    existing: Vec<MarketMapping>,
    fresh: Vec<MarketMapping>,
) -> Vec<MarketMapping> {
    let matched: std::collections::HashSet<String> = fresh
        .iter()
        .map(|m| m.exchange.contract_id.clone())
        .collect();
    let mut merged: Vec<MarketMapping> = existing
        .into_iter()
        .filter(|m| !matched.contains(&m.exchange.contract_id))
        .collect();
    merged.extend(fresh);
    merged
}

/// Write the registry atomically: temp file in the same directory, then
/// rename over the target.
pub fn write_mappings(path: &Path, mappings: &[MarketMapping]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {:?}", parent))?;
        }
    }

    let registry = MappingRegistry {
        markets: mappings.to_vec(),
    };
    let rendered = toml::to_string_pretty(&registry).context("failed to render registry")?;

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, rendered)
        .with_context(|| format!("failed to write {:?}", tmp_path))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename {:?} into place", tmp_path))?;

    debug!("wrote {} mappings to {:?}", mappings.len(), path);
    Ok(())
}

fn read_existing(path: &Path) -> Vec<MarketMapping> {
    if !path.exists() {
        return Vec::new();
    }
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| toml::from_str::<MappingRegistry>(&raw).ok())
        .map(|r| r.markets)
        .unwrap_or_default()
}

/// Fetch contracts and events, build mappings, merge with the registry, and
/// write it back. Returns the merged entries.
pub async fn auto_map(
    exchange: &dyn crate::clients::ExchangeClient,
    odds_api: &crate::clients::OddsApiClient,
    sport: &str,
    mapping_path: &Path,
) -> Result<Vec<MarketMapping>> {
    let series = match series_for_sport(sport) {
        Some(series) => series,
        None => bail!("no exchange series for sport {}", sport),
    };

    // Paginate the series' contracts off the exchange.
    let mut contracts = Vec::new();
    let mut cursor = None;
    for _ in 0..3 {
        let (page, next) = exchange
            .get_markets(200, cursor, None)
            .await
            .context("failed to list exchange markets")?;
        contracts.extend(page.into_iter().filter(|c| c.ticker.starts_with(series)));
        cursor = next;
        if cursor.is_none() {
            break;
        }
    }

    let events = odds_api
        .list_events(sport)
        .await
        .context("failed to list aggregator events")?;

    let fresh = build_mapping_entries(&contracts, &events, series);
    let merged = merge_mappings(read_existing(mapping_path), fresh);

    if !merged.is_empty() {
        write_mappings(mapping_path, &merged)?;
    }

    info!(
        "auto-map: {} contracts, {} events, {} mappings",
        contracts.len(),
        events.len(),
        merged.len()
    );
    Ok(merged)
}
