//! Application configuration loaded from environment variables.
//!
//! All variables use the `EDGEBOT_` prefix and can also come from a `.env`
//! file. Validation failures are fatal at startup.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Trading mode for the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    /// Print orders without executing
    DryRun,
    /// Simulated fills against the mock client
    Paper,
    /// Real money
    Live,
}

impl TradingMode {
    pub fn as_str(&self) -> &str {
        match self {
            TradingMode::DryRun => "dry_run",
            TradingMode::Paper => "paper",
            TradingMode::Live => "live",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dry_run" => Some(TradingMode::DryRun),
            "paper" => Some(TradingMode::Paper),
            "live" => Some(TradingMode::Live),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Exchange credentials (RSA-style key id + signing key file)
    pub exchange_api_key_id: String,
    pub exchange_private_key_path: String,
    pub exchange_base_url: String,
    pub exchange_requests_per_second: f64,

    // Odds aggregator
    pub odds_api_key: String,
    pub odds_api_base_url: String,
    pub odds_api_requests_per_second: f64,

    // Mode & scheduling
    pub mode: TradingMode,
    pub timezone: String,
    pub run_time: String,
    pub trading_cutoff_minutes: i64,

    // Market filters
    pub min_volume_24h: i64,
    pub max_spread_cents: i64,
    pub min_orderbook_depth: i64,
    pub category_whitelist: Vec<String>,
    pub category_blacklist: Vec<String>,
    pub market_blacklist: Vec<String>,

    // Risk limits
    pub max_daily_loss_dollars: f64,
    pub max_per_market_exposure_dollars: f64,
    pub max_total_exposure_dollars: f64,
    pub max_open_positions: usize,
    pub max_trades_per_day: usize,
    pub default_position_size_dollars: f64,
    pub use_kelly_sizing: bool,
    pub kelly_fraction: f64,
    pub use_limit_orders_only: bool,

    // Strategy thresholds
    pub min_expected_value: f64,
    pub min_win_rate: f64,
    pub min_backtest_samples: i64,
    pub max_drawdown_percent: f64,
    pub confidence_threshold: f64,

    // Persistence
    pub database_path: String,
    pub snapshot_interval_minutes: u64,
    pub data_retention_days: i64,

    // Observability
    pub log_level: String,
    pub log_format: String,
    pub alert_webhook_url: Option<String>,
    pub enable_daily_report: bool,

    // Scanner
    pub mapping_file: String,
    pub fuzzy_match_enabled: bool,
    pub fuzzy_match_threshold: f64,
    pub poll_interval_seconds: f64,
    pub exchange_slippage_buffer: f64,
    pub sportsbook_friction: f64,
    pub min_edge_bps: f64,
    pub min_liquidity: i64,
    pub max_staleness_seconds: f64,
    pub alerts_jsonl_path: String,

    // Execution & automation
    pub execution_enabled: bool,
    pub default_sport: String,
    pub auto_map_enabled: bool,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON" | "yes"))
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        // Canonical credential pair, with the legacy single-key variable
        // accepted only as an alias for the key id.
        let mut exchange_api_key_id = env_or("EDGEBOT_EXCHANGE_API_KEY_ID", "");
        if exchange_api_key_id.is_empty() {
            exchange_api_key_id = env_or("EDGEBOT_EXCHANGE_API_KEY", "");
        }

        let mode_str = env_or("EDGEBOT_MODE", "paper");
        let mode = match TradingMode::parse(&mode_str) {
            Some(m) => m,
            None => bail!("Invalid EDGEBOT_MODE '{}': expected paper, live, or dry_run", mode_str),
        };

        let config = Self {
            exchange_api_key_id,
            exchange_private_key_path: env_or("EDGEBOT_EXCHANGE_PRIVATE_KEY_PATH", ""),
            exchange_base_url: env_or(
                "EDGEBOT_EXCHANGE_BASE_URL",
                "https://api.exchange.example.com/trade-api/v2",
            ),
            exchange_requests_per_second: env_parse("EDGEBOT_EXCHANGE_RPS", 5.0),

            odds_api_key: env_or("EDGEBOT_ODDS_API_KEY", ""),
            odds_api_base_url: env_or(
                "EDGEBOT_ODDS_API_BASE_URL",
                "https://api.the-odds-api.com/v4",
            ),
            odds_api_requests_per_second: env_parse("EDGEBOT_ODDS_API_RPS", 1.0),

            mode,
            timezone: env_or("EDGEBOT_TIMEZONE", "America/New_York"),
            run_time: env_or("EDGEBOT_RUN_TIME", "08:30"),
            trading_cutoff_minutes: env_parse("EDGEBOT_TRADING_CUTOFF_MINUTES", 30),

            min_volume_24h: env_parse("EDGEBOT_MIN_VOLUME_24H", 100),
            max_spread_cents: env_parse("EDGEBOT_MAX_SPREAD_CENTS", 10),
            min_orderbook_depth: env_parse("EDGEBOT_MIN_ORDERBOOK_DEPTH", 50),
            category_whitelist: env_list("EDGEBOT_CATEGORY_WHITELIST"),
            category_blacklist: env_list("EDGEBOT_CATEGORY_BLACKLIST"),
            market_blacklist: env_list("EDGEBOT_MARKET_BLACKLIST"),

            max_daily_loss_dollars: env_parse("EDGEBOT_MAX_DAILY_LOSS", 50.0),
            max_per_market_exposure_dollars: env_parse("EDGEBOT_MAX_PER_MARKET_EXPOSURE", 20.0),
            max_total_exposure_dollars: env_parse("EDGEBOT_MAX_TOTAL_EXPOSURE", 100.0),
            max_open_positions: env_parse("EDGEBOT_MAX_OPEN_POSITIONS", 10),
            max_trades_per_day: env_parse("EDGEBOT_MAX_TRADES_PER_DAY", 20),
            default_position_size_dollars: env_parse("EDGEBOT_DEFAULT_POSITION_SIZE", 5.0),
            use_kelly_sizing: env_bool("EDGEBOT_USE_KELLY_SIZING", true),
            kelly_fraction: env_parse("EDGEBOT_KELLY_FRACTION", 0.25),
            use_limit_orders_only: env_bool("EDGEBOT_USE_LIMIT_ORDERS_ONLY", true),

            min_expected_value: env_parse("EDGEBOT_MIN_EXPECTED_VALUE", 0.02),
            min_win_rate: env_parse("EDGEBOT_MIN_WIN_RATE", 0.70),
            min_backtest_samples: env_parse("EDGEBOT_MIN_BACKTEST_SAMPLES", 30),
            max_drawdown_percent: env_parse("EDGEBOT_MAX_DRAWDOWN_PERCENT", 0.20),
            confidence_threshold: env_parse("EDGEBOT_CONFIDENCE_THRESHOLD", 0.60),

            database_path: env_or("EDGEBOT_DATABASE_PATH", "./edgebot.db"),
            snapshot_interval_minutes: env_parse("EDGEBOT_SNAPSHOT_INTERVAL_MINUTES", 5),
            data_retention_days: env_parse("EDGEBOT_DATA_RETENTION_DAYS", 90),

            log_level: env_or("EDGEBOT_LOG_LEVEL", "info"),
            log_format: env_or("EDGEBOT_LOG_FORMAT", "console"),
            alert_webhook_url: std::env::var("EDGEBOT_ALERT_WEBHOOK_URL").ok(),
            enable_daily_report: env_bool("EDGEBOT_ENABLE_DAILY_REPORT", true),

            mapping_file: env_or("EDGEBOT_MAPPING_FILE", "mappings.toml"),
            fuzzy_match_enabled: env_bool("EDGEBOT_FUZZY_MATCH_ENABLED", false),
            fuzzy_match_threshold: env_parse("EDGEBOT_FUZZY_MATCH_THRESHOLD", 0.75),
            poll_interval_seconds: env_parse("EDGEBOT_POLL_INTERVAL_SECONDS", 60.0),
            exchange_slippage_buffer: env_parse("EDGEBOT_EXCHANGE_SLIPPAGE_BUFFER", 0.005),
            sportsbook_friction: env_parse("EDGEBOT_SPORTSBOOK_FRICTION", 0.01),
            min_edge_bps: env_parse("EDGEBOT_MIN_EDGE_BPS", 50.0),
            min_liquidity: env_parse("EDGEBOT_MIN_LIQUIDITY", 10),
            max_staleness_seconds: env_parse("EDGEBOT_MAX_STALENESS_SECONDS", 60.0),
            alerts_jsonl_path: env_or("EDGEBOT_ALERTS_JSONL", "alerts.jsonl"),

            execution_enabled: env_bool("EDGEBOT_EXECUTION_ENABLED", false),
            default_sport: env_or("EDGEBOT_DEFAULT_SPORT", "basketball_nba"),
            auto_map_enabled: env_bool("EDGEBOT_AUTO_MAP_ENABLED", true),
        };

        config.validate()?;
        Ok(config)
    }

    /// Fail-fast validation of option ranges.
    pub fn validate(&self) -> Result<()> {
        if !(0.5..=1.0).contains(&self.min_win_rate) {
            bail!("min_win_rate must be between 0.5 and 1.0, got {}", self.min_win_rate);
        }
        if self.kelly_fraction <= 0.0 || self.kelly_fraction > 1.0 {
            bail!("kelly_fraction must be in (0, 1], got {}", self.kelly_fraction);
        }
        if self.max_drawdown_percent <= 0.0 || self.max_drawdown_percent > 1.0 {
            bail!(
                "max_drawdown_percent must be in (0, 1], got {}",
                self.max_drawdown_percent
            );
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            bail!(
                "confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            );
        }
        if self.exchange_slippage_buffer < 0.0 || self.sportsbook_friction < 0.0 {
            bail!("slippage buffer and friction must be non-negative");
        }
        Ok(())
    }

    pub fn exchange_configured(&self) -> bool {
        !self.exchange_api_key_id.is_empty() && !self.exchange_private_key_path.is_empty()
    }

    pub fn odds_api_configured(&self) -> bool {
        !self.odds_api_key.is_empty()
    }

    pub fn is_live(&self) -> bool {
        self.mode == TradingMode::Live
    }
}

impl Default for Config {
    /// Defaults without touching the environment. Used by tests.
    fn default() -> Self {
        Self {
            exchange_api_key_id: String::new(),
            exchange_private_key_path: String::new(),
            exchange_base_url: "https://api.exchange.example.com/trade-api/v2".into(),
            exchange_requests_per_second: 5.0,
            odds_api_key: String::new(),
            odds_api_base_url: "https://api.the-odds-api.com/v4".into(),
            odds_api_requests_per_second: 1.0,
            mode: TradingMode::Paper,
            timezone: "America/New_York".into(),
            run_time: "08:30".into(),
            trading_cutoff_minutes: 30,
            min_volume_24h: 100,
            max_spread_cents: 10,
            min_orderbook_depth: 50,
            category_whitelist: Vec::new(),
            category_blacklist: Vec::new(),
            market_blacklist: Vec::new(),
            max_daily_loss_dollars: 50.0,
            max_per_market_exposure_dollars: 20.0,
            max_total_exposure_dollars: 100.0,
            max_open_positions: 10,
            max_trades_per_day: 20,
            default_position_size_dollars: 5.0,
            use_kelly_sizing: true,
            kelly_fraction: 0.25,
            use_limit_orders_only: true,
            min_expected_value: 0.02,
            min_win_rate: 0.70,
            min_backtest_samples: 30,
            max_drawdown_percent: 0.20,
            confidence_threshold: 0.60,
            database_path: "./edgebot.db".into(),
            snapshot_interval_minutes: 5,
            data_retention_days: 90,
            log_level: "info".into(),
            log_format: "console".into(),
            alert_webhook_url: None,
            enable_daily_report: true,
            mapping_file: "mappings.toml".into(),
            fuzzy_match_enabled: false,
            fuzzy_match_threshold: 0.75,
            poll_interval_seconds: 60.0,
            exchange_slippage_buffer: 0.005,
            sportsbook_friction: 0.01,
            min_edge_bps: 50.0,
            min_liquidity: 10,
            max_staleness_seconds: 60.0,
            alerts_jsonl_path: "alerts.jsonl".into(),
            execution_enabled: false,
            default_sport: "basketball_nba".into(),
            auto_map_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(!config.exchange_configured());
        assert_eq!(config.mode, TradingMode::Paper);
    }

    #[test]
    fn test_win_rate_bounds_rejected() {
        let mut config = Config::default();
        config.min_win_rate = 0.4;
        assert!(config.validate().is_err());
        config.min_win_rate = 1.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_kelly_fraction_bounds_rejected() {
        let mut config = Config::default();
        config.kelly_fraction = 0.0;
        assert!(config.validate().is_err());
        config.kelly_fraction = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(TradingMode::parse("paper"), Some(TradingMode::Paper));
        assert_eq!(TradingMode::parse("live"), Some(TradingMode::Live));
        assert_eq!(TradingMode::parse("dry_run"), Some(TradingMode::DryRun));
        assert_eq!(TradingMode::parse("bogus"), None);
    }
}
