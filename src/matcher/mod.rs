//! Market matcher - pairs exchange contracts with aggregator selections.
//!
//! Primary source is the manually curated TOML registry. Fuzzy title
//! matching produces candidate suggestions for manual review only; it never
//! writes mappings.

pub mod automapper;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{Contract, OddsQuote};

/// One registry entry pairing an exchange contract side with an aggregator
/// selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketMapping {
    pub market_key: String,
    pub exchange: ExchangeMapping,
    pub aggregator: AggregatorMapping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeMapping {
    pub contract_id: String,
    #[serde(default = "default_side")]
    pub side: String,
}

fn default_side() -> String {
    "YES".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorMapping {
    pub event_id: String,
    pub market_type: String,
    pub selection: String,
}

/// Registry file shape: `[[markets]]` entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingRegistry {
    #[serde(default)]
    pub markets: Vec<MarketMapping>,
}

pub struct MarketMatcher {
    mapping_file: Option<PathBuf>,
    fuzzy_enabled: bool,
    fuzzy_threshold: f64,

    mappings: HashMap<String, MarketMapping>,
    exchange_to_key: HashMap<String, String>,
    odds_to_key: HashMap<(String, String, String), String>,

    /// Malformed registry rows seen on the last load
    pub skipped_rows: usize,
}

impl MarketMatcher {
    pub fn new(mapping_file: Option<&Path>, fuzzy_enabled: bool, fuzzy_threshold: f64) -> Self {
        Self {
            mapping_file: mapping_file.map(|p| p.to_path_buf()),
            fuzzy_enabled,
            fuzzy_threshold,
            mappings: HashMap::new(),
            exchange_to_key: HashMap::new(),
            odds_to_key: HashMap::new(),
            skipped_rows: 0,
        }
    }

    /// Load the registry. Malformed rows are skipped and counted; returns
    /// the number of mappings loaded.
    pub fn load_mappings(&mut self) -> Result<usize> {
        self.mappings.clear();
        self.exchange_to_key.clear();
        self.odds_to_key.clear();
        self.skipped_rows = 0;

        let path = match &self.mapping_file {
            Some(path) if path.exists() => path.clone(),
            _ => return Ok(0),
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read mapping registry {:?}", path))?;
        let value: toml::Value = raw
            .parse()
            .with_context(|| format!("mapping registry {:?} is not valid TOML", path))?;

        let entries = value
            .get("markets")
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default();

        let mut count = 0;
        for entry in entries {
            match entry.try_into::<MarketMapping>() {
                Ok(mapping) if !mapping.market_key.is_empty() => {
                    self.index_mapping(&mapping);
                    self.mappings.insert(mapping.market_key.clone(), mapping);
                    count += 1;
                }
                Ok(_) => {
                    self.skipped_rows += 1;
                    warn!("skipping registry row with empty market_key");
                }
                Err(e) => {
                    self.skipped_rows += 1;
                    warn!("skipping malformed registry row: {}", e);
                }
            }
        }

        debug!(
            "loaded {} mappings ({} rows skipped) from {:?}",
            count, self.skipped_rows, path
        );
        Ok(count)
    }

    fn index_mapping(&mut self, mapping: &MarketMapping) {
        if !mapping.exchange.contract_id.is_empty() {
            self.exchange_to_key
                .insert(mapping.exchange.contract_id.clone(), mapping.market_key.clone());
        }
        let agg = &mapping.aggregator;
        if !agg.event_id.is_empty() && !agg.market_type.is_empty() && !agg.selection.is_empty() {
            self.odds_to_key.insert(
                (agg.event_id.clone(), agg.market_type.clone(), agg.selection.clone()),
                mapping.market_key.clone(),
            );
        }
    }

    pub fn market_key_for_exchange(&self, contract_id: &str) -> Option<&str> {
        self.exchange_to_key.get(contract_id).map(|s| s.as_str())
    }

    pub fn market_key_for_odds(
        &self,
        event_id: &str,
        market_type: &str,
        selection: &str,
    ) -> Option<&str> {
        self.odds_to_key
            .get(&(event_id.to_string(), market_type.to_string(), selection.to_string()))
            .map(|s| s.as_str())
    }

    pub fn mapping(&self, market_key: &str) -> Option<&MarketMapping> {
        self.mappings.get(market_key)
    }

    pub fn all_market_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.mappings.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Fuzzy candidates for manual review. Only pairs where neither side is
    /// already mapped; sorted by score descending, top 50.
    pub fn find_fuzzy_candidates<'a>(
        &self,
        contracts: &'a [Contract],
        quotes: &'a [OddsQuote],
    ) -> Vec<(&'a Contract, &'a OddsQuote, f64)> {
        if !self.fuzzy_enabled {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for contract in contracts {
            if self.exchange_to_key.contains_key(&contract.ticker) {
                continue;
            }
            for quote in quotes {
                let key = (
                    quote.event_id.clone(),
                    quote.market_type.as_str().to_string(),
                    quote.selection.clone(),
                );
                if self.odds_to_key.contains_key(&key) {
                    continue;
                }
                let score = token_sort_ratio(&contract.title, &quote.event_title);
                if score >= self.fuzzy_threshold {
                    candidates.push((contract, quote, score));
                }
            }
        }

        candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(50);
        candidates
    }
}

/// Token-sort string similarity in [0, 1]: lowercase, split on
/// non-alphanumerics, sort tokens, then normalized edit distance.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let normalize = |s: &str| {
        let mut tokens: Vec<String> = s
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect();
        tokens.sort();
        tokens.join(" ")
    };

    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const REGISTRY: &str = r#"
[[markets]]
market_key = "nba_20260207_houokc_okc"

[markets.exchange]
contract_id = "KXNBAGAME-26FEB07HOUOKC-OKC"
side = "YES"

[markets.aggregator]
event_id = "ev-1"
market_type = "h2h"
selection = "Oklahoma City Thunder"

[[markets]]
market_key = "nba_20260207_houokc_hou"

[markets.exchange]
contract_id = "KXNBAGAME-26FEB07HOUOKC-HOU"

[markets.aggregator]
event_id = "ev-1"
market_type = "h2h"
selection = "Houston Rockets"
"#;

    fn write_registry(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_and_resolve() {
        let file = write_registry(REGISTRY);
        let mut matcher = MarketMatcher::new(Some(file.path()), false, 0.75);
        let count = matcher.load_mappings().unwrap();
        assert_eq!(count, 2);
        assert_eq!(matcher.skipped_rows, 0);

        assert_eq!(
            matcher.market_key_for_exchange("KXNBAGAME-26FEB07HOUOKC-OKC"),
            Some("nba_20260207_houokc_okc")
        );
        assert_eq!(
            matcher.market_key_for_odds("ev-1", "h2h", "Houston Rockets"),
            Some("nba_20260207_houokc_hou")
        );
        assert!(matcher.market_key_for_odds("ev-1", "h2h", "Lakers").is_none());

        let keys = matcher.all_market_keys();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_malformed_rows_skipped_and_counted() {
        let content = format!(
            "{}\n[[markets]]\nmarket_key = \"broken\"\n# missing exchange/aggregator tables\n",
            REGISTRY
        );
        let file = write_registry(&content);
        let mut matcher = MarketMatcher::new(Some(file.path()), false, 0.75);
        let count = matcher.load_mappings().unwrap();
        assert_eq!(count, 2);
        assert_eq!(matcher.skipped_rows, 1);
    }

    #[test]
    fn test_missing_file_loads_zero() {
        let mut matcher =
            MarketMatcher::new(Some(Path::new("/nonexistent/mappings.toml")), false, 0.75);
        assert_eq!(matcher.load_mappings().unwrap(), 0);
    }

    #[test]
    fn test_token_sort_ratio() {
        // Order-insensitive
        let a = token_sort_ratio("Thunder vs Rockets", "Rockets vs Thunder");
        assert!(a > 0.99);

        let close = token_sort_ratio("Oklahoma City Thunder", "Oklahoma Thunder");
        assert!(close > 0.7);

        let far = token_sort_ratio("Oklahoma City Thunder", "Boston Celtics");
        assert!(far < 0.5);
    }

    #[test]
    fn test_fuzzy_disabled_returns_empty() {
        let matcher = MarketMatcher::new(None, false, 0.75);
        assert!(matcher.find_fuzzy_candidates(&[], &[]).is_empty());
    }
}
