//! edgebot - prediction-market vs sportsbook edge scanner and scheduled
//! trading runner.
//!
//! The scanner commands (`scan`, `run`, `detail`, `execute`, `show`)
//! compare exchange prices against bookmaker odds and surface hedged
//! opportunities. The `runner` commands drive the strategy trading cycle.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use edgebot::clients::{ExchangeClient, ExchangeHttpClient, MockExchangeClient, OddsApiClient};
use edgebot::config::{Config, TradingMode};
use edgebot::matcher::{automapper, MarketMatcher};
use edgebot::models::{Alert, Direction, Opportunity, OrderSide};
use edgebot::observability::generate_daily_report;
use edgebot::runner::{RunSummary, TradingRunner};
use edgebot::scanner::aggregate::aggregate_opportunities;
use edgebot::scanner::Scanner;
use edgebot::store::Repository;

/// Scratch file carrying the last scan's opportunities between commands.
const LAST_OPPORTUNITIES_FILE: &str = ".last_opportunities.json";

#[derive(Parser)]
#[command(name = "edgebot", version, about = "Exchange vs sportsbook edge scanner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch and persist exchange contracts
    SyncMarkets,
    /// Fetch and persist sportsbook odds for a sport
    SyncOdds {
        #[arg(short, long)]
        sport: Option<String>,
    },
    /// One scan cycle: fetch, compare, print ranked opportunities
    Scan {
        #[arg(short, long)]
        sport: Option<String>,
        /// Refresh mappings from the exchange and aggregator first
        #[arg(long)]
        auto_map: Option<bool>,
    },
    /// Continuous scan loop
    Run {
        #[arg(short, long)]
        sport: Option<String>,
        /// Poll interval in seconds
        #[arg(short, long)]
        interval: Option<f64>,
        #[arg(long)]
        auto_map: Option<bool>,
    },
    /// Show the full breakdown for an opportunity from the last scan
    Detail {
        /// 1-based opportunity number
        index: usize,
    },
    /// Place the exchange leg of an opportunity (hedge is manual)
    Execute {
        index: usize,
        #[arg(short = 'n', long, default_value_t = 100)]
        shares: i64,
        /// Preview only; pass `--dry-run false` to arm
        #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
        dry_run: bool,
        /// Required for any real submission
        #[arg(short = 'y', long, default_value_t = false)]
        confirm: bool,
    },
    /// Print recent alerts
    Show {
        #[arg(short = 'n', long, default_value_t = 20)]
        last: usize,
    },
    /// Strategy trading runner
    Runner {
        #[command(subcommand)]
        command: RunnerCommand,
    },
}

#[derive(Subcommand)]
enum RunnerCommand {
    /// Execute one full trading cycle
    Run {
        #[arg(long)]
        mode: Option<String>,
    },
    /// Snapshot-only mode to build history
    Snapshot {
        #[arg(long, value_delimiter = ',')]
        tickers: Vec<String>,
    },
    /// Print the daily report for a date
    Report {
        #[arg(long)]
        date: String,
    },
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };
    init_logging(&config);

    let result = match cli.command {
        Command::SyncMarkets => sync_markets(&config).await,
        Command::SyncOdds { sport } => sync_odds(&config, sport).await,
        Command::Scan { sport, auto_map } => scan_once(&config, sport, auto_map).await,
        Command::Run {
            sport,
            interval,
            auto_map,
        } => scan_loop(&config, sport, interval, auto_map).await,
        Command::Detail { index } => detail(index),
        Command::Execute {
            index,
            shares,
            dry_run,
            confirm,
        } => execute(&config, index, shares, dry_run, confirm).await,
        Command::Show { last } => show_alerts(&config, last),
        Command::Runner { command } => match command {
            RunnerCommand::Run { mode } => runner_run(config.clone(), mode).await,
            RunnerCommand::Snapshot { tickers } => runner_snapshot(config.clone(), tickers).await,
            RunnerCommand::Report { date } => runner_report(&config, &date),
        },
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

// ── Client wiring ───────────────────────────────────────────────────────

fn exchange_client(config: &Config) -> Result<Arc<ExchangeHttpClient>> {
    if !config.exchange_configured() {
        anyhow::bail!(
            "exchange not configured: set EDGEBOT_EXCHANGE_API_KEY_ID and \
             EDGEBOT_EXCHANGE_PRIVATE_KEY_PATH"
        );
    }
    let client = ExchangeHttpClient::new(
        &config.exchange_api_key_id,
        &config.exchange_private_key_path,
        &config.exchange_base_url,
        config.exchange_requests_per_second,
    )?;
    Ok(Arc::new(client))
}

fn odds_client(config: &Config) -> Result<OddsApiClient> {
    if !config.odds_api_configured() {
        anyhow::bail!("odds aggregator not configured: set EDGEBOT_ODDS_API_KEY");
    }
    Ok(OddsApiClient::new(
        &config.odds_api_key,
        &config.odds_api_base_url,
        config.odds_api_requests_per_second,
    )?)
}

// ── Sync commands ───────────────────────────────────────────────────────

async fn sync_markets(config: &Config) -> Result<()> {
    let exchange = exchange_client(config)?;
    let repo = Repository::open(&config.database_path)?;

    let mut cursor = None;
    let mut total = 0usize;
    for _ in 0..10 {
        let (contracts, next) = exchange.get_markets(100, cursor, None).await?;
        for contract in &contracts {
            repo.save_contract(contract)?;
        }
        total += contracts.len();
        cursor = next;
        if cursor.is_none() {
            break;
        }
    }

    println!("synced {} contracts", total);
    Ok(())
}

async fn sync_odds(config: &Config, sport: Option<String>) -> Result<()> {
    let sport = sport.unwrap_or_else(|| config.default_sport.clone());
    let odds_api = odds_client(config)?;
    let repo = Repository::open(&config.database_path)?;

    let raw_events = odds_api
        .get_odds(&sport, "us", "h2h", "american", None)
        .await?;
    let quotes = odds_api.parse_odds_to_quotes(&raw_events);
    for quote in &quotes {
        repo.save_quote(quote)?;
    }

    println!(
        "synced {} quotes from {} events for {}",
        quotes.len(),
        raw_events.len(),
        sport
    );
    Ok(())
}

// ── Scan ────────────────────────────────────────────────────────────────

async fn run_scan_cycle(
    sport: &str,
    matcher: &MarketMatcher,
    scanner: &mut Scanner,
    exchange: &Arc<ExchangeHttpClient>,
    odds_api: &OddsApiClient,
) -> Result<(Vec<Alert>, Vec<Opportunity>)> {
    let raw_events = odds_api
        .get_odds(sport, "us", "h2h", "american", None)
        .await?;
    let quotes = odds_api.parse_odds_to_quotes(&raw_events);

    let mut all_alerts = Vec::new();
    for market_key in matcher.all_market_keys() {
        let mapping = match matcher.mapping(&market_key) {
            Some(mapping) => mapping,
            None => continue,
        };
        let contract_id = &mapping.exchange.contract_id;
        if contract_id.is_empty() {
            continue;
        }

        let tob = match exchange.get_top_of_book(contract_id).await {
            Ok(Some(tob)) => tob,
            Ok(None) => continue,
            Err(e) => {
                warn!("top-of-book fetch failed for {}: {}", contract_id, e);
                continue;
            }
        };

        let relevant: Vec<_> = quotes
            .iter()
            .filter(|q| {
                q.event_id == mapping.aggregator.event_id
                    && q.market_type.as_str() == mapping.aggregator.market_type
            })
            .cloned()
            .collect();
        if relevant.is_empty() {
            continue;
        }

        all_alerts.extend(scanner.compare(&market_key, &tob, &relevant));
    }

    let opportunities = aggregate_opportunities(&all_alerts);
    Ok((all_alerts, opportunities))
}

async fn prepare_scan(
    config: &Config,
    sport: &str,
    auto_map: Option<bool>,
) -> Result<(MarketMatcher, Scanner, Arc<ExchangeHttpClient>, OddsApiClient)> {
    let exchange = exchange_client(config)?;
    let odds_api = odds_client(config)?;

    let do_auto_map = auto_map.unwrap_or(config.auto_map_enabled);
    if do_auto_map {
        info!("auto-mapping exchange <-> aggregator");
        match automapper::auto_map(
            exchange.as_ref(),
            &odds_api,
            sport,
            Path::new(&config.mapping_file),
        )
        .await
        {
            Ok(mappings) => println!("mapped {} markets", mappings.len()),
            Err(e) => warn!("auto-map failed: {}", e),
        }
    }

    let mut matcher = MarketMatcher::new(
        Some(Path::new(&config.mapping_file)),
        config.fuzzy_match_enabled,
        config.fuzzy_match_threshold,
    );
    let loaded = matcher.load_mappings()?;
    info!("loaded {} market mappings", loaded);
    if loaded == 0 {
        warn!(
            "no mappings found; create {} or enable auto-map",
            config.mapping_file
        );
    }

    let scanner = Scanner::new(
        config.exchange_slippage_buffer,
        config.sportsbook_friction,
        config.min_edge_bps,
        config.min_liquidity,
        config.max_staleness_seconds,
    );

    Ok((matcher, scanner, exchange, odds_api))
}

fn persist_scan_output(
    config: &Config,
    repo: &Repository,
    alerts: &[Alert],
    opportunities: &[Opportunity],
) -> Result<()> {
    save_last_opportunities(opportunities)?;

    let mut jsonl = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.alerts_jsonl_path)?;
    for alert in alerts {
        repo.save_alert(alert)?;
        writeln!(jsonl, "{}", serde_json::to_string(alert)?)?;
    }
    Ok(())
}

async fn scan_once(config: &Config, sport: Option<String>, auto_map: Option<bool>) -> Result<()> {
    let sport = sport.unwrap_or_else(|| config.default_sport.clone());
    let (matcher, mut scanner, exchange, odds_api) =
        prepare_scan(config, &sport, auto_map).await?;
    let repo = Repository::open(&config.database_path)?;

    println!("scanning {}...", sport);
    let (alerts, opportunities) =
        run_scan_cycle(&sport, &matcher, &mut scanner, &exchange, &odds_api).await?;

    println!(
        "\nEDGE SCANNER  |  {} opportunities  |  {}\n",
        opportunities.len(),
        Utc::now().format("%b %d %Y %H:%M UTC")
    );
    render_opportunities(&opportunities);
    persist_scan_output(config, &repo, &alerts, &opportunities)?;
    Ok(())
}

async fn scan_loop(
    config: &Config,
    sport: Option<String>,
    interval: Option<f64>,
    auto_map: Option<bool>,
) -> Result<()> {
    let sport = sport.unwrap_or_else(|| config.default_sport.clone());
    let interval = interval.unwrap_or(config.poll_interval_seconds).max(1.0);
    let (matcher, mut scanner, exchange, odds_api) =
        prepare_scan(config, &sport, auto_map).await?;
    let repo = Repository::open(&config.database_path)?;

    println!("starting scanner (alert-only mode), ctrl-c to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nstopped");
                return Ok(());
            }
            result = run_scan_cycle(&sport, &matcher, &mut scanner, &exchange, &odds_api) => {
                match result {
                    Ok((alerts, opportunities)) => {
                        if opportunities.is_empty() {
                            println!("no opportunities");
                        } else {
                            println!(
                                "\nEDGE SCANNER  |  {} opportunities  |  {}\n",
                                opportunities.len(),
                                Utc::now().format("%b %d %Y %H:%M UTC")
                            );
                            render_opportunities(&opportunities);
                        }
                        // Finish the write even if a ctrl-c arrives next.
                        if let Err(e) = persist_scan_output(config, &repo, &alerts, &opportunities) {
                            error!("failed to persist scan output: {}", e);
                        }
                    }
                    Err(e) => {
                        error!("scan error: {}", e);
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    }
                }
            }
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nstopped");
                return Ok(());
            }
            _ = tokio::time::sleep(Duration::from_secs_f64(interval)) => {}
        }
    }
}

// ── Opportunity presentation & scratch file ─────────────────────────────

fn format_liquidity(n: i64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

fn render_opportunities(opportunities: &[Opportunity]) {
    if opportunities.is_empty() {
        println!("no opportunities");
        return;
    }

    println!(
        "{:>3}  {:<22} {:>6}  {:<36} {:<38} {:>5} {:>6} {:>4}",
        "#", "Game", "Edge", "Action", "Hedge", "Books", "Liq", "Conf"
    );
    for (i, opp) in opportunities.iter().enumerate() {
        println!(
            "{:>3}  {:<22} {:>5.1}c  {:<36} {:<38} {:>5} {:>6} {:>4}",
            i + 1,
            truncate_str(&opp.game_label, 22),
            opp.edge_cents,
            truncate_str(&opp.exchange_action, 36),
            truncate_str(&opp.hedge_action, 38),
            opp.book_count,
            format_liquidity(opp.exchange_liquidity),
            opp.confidence.as_str().to_uppercase(),
        );
    }
    println!("\ndetail: edgebot detail <#>   |   execute: edgebot execute <#> --shares 100");
}

fn truncate_str(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Atomic rewrite of the scratch file read by `detail` and `execute`.
fn save_last_opportunities(opportunities: &[Opportunity]) -> Result<()> {
    let path = PathBuf::from(LAST_OPPORTUNITIES_FILE);
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string(opportunities)?)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

fn load_last_opportunities() -> Result<Vec<Opportunity>> {
    let path = PathBuf::from(LAST_OPPORTUNITIES_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn pick_opportunity(index: usize) -> Result<Opportunity> {
    let opportunities = load_last_opportunities()?;
    if opportunities.is_empty() {
        anyhow::bail!("no opportunities saved; run `edgebot scan` first");
    }
    if index < 1 || index > opportunities.len() {
        anyhow::bail!("invalid index {}; use 1-{}", index, opportunities.len());
    }
    Ok(opportunities[index - 1].clone())
}

fn detail(index: usize) -> Result<()> {
    let opp = pick_opportunity(index)?;

    println!("\n#{} {}\n", index, opp.game_label);
    println!("  Exchange:  {}", opp.exchange_action);
    println!("  Hedge:     {}", opp.hedge_action);
    println!(
        "  Edge:      {:.2}c per share  ({:.0} bps)",
        opp.edge_cents, opp.edge_bps
    );
    println!(
        "  Books:     {} agreeing  |  Best: {}  |  Worst: {}",
        opp.book_count, opp.book_best, opp.book_worst
    );
    println!(
        "  Liquidity: {} shares  |  Max size: {}",
        format_liquidity(opp.exchange_liquidity),
        opp.max_shares
    );
    println!(
        "  P&L:       ${:.2} expected per 100 shares",
        opp.pnl_per_100_shares
    );
    println!(
        "  Fair prob: {:.3} across {} books",
        opp.book_fair_prob, opp.book_count
    );
    println!("\n  {}", opp.exchange_url);
    Ok(())
}

async fn execute(
    config: &Config,
    index: usize,
    mut shares: i64,
    dry_run: bool,
    confirm: bool,
) -> Result<()> {
    if !config.execution_enabled && !dry_run {
        anyhow::bail!("execution is disabled; set EDGEBOT_EXECUTION_ENABLED=true to enable");
    }

    let opp = pick_opportunity(index)?;
    if shares > opp.max_shares {
        warn!(
            "requested {} shares exceeds max {}; capping",
            shares, opp.max_shares
        );
        shares = opp.max_shares;
    }

    if dry_run {
        println!("DRY RUN - no order will be placed\n");
    }
    println!("  Opportunity: {}", opp.game_label);
    println!("  Action:      {}  x {} shares", opp.exchange_action, shares);
    println!("  Then hedge:  {}", opp.hedge_action);

    if dry_run {
        println!("\nrun with --dry-run false --confirm to place the order");
        return Ok(());
    }
    if !confirm {
        anyhow::bail!("add --confirm to place the order");
    }

    let exchange = exchange_client(config)?;
    let action = match opp.direction {
        Direction::ExchangeRich => "sell",
        Direction::ExchangeCheap => "buy",
    };
    let price_cents = opp.exchange_price_cents.clamp(1, 99);
    let client_order_id = format!(
        "{}:{}:scanner:{}",
        Utc::now().format("%Y-%m-%d"),
        opp.exchange_ticker,
        action
    );

    let result = exchange
        .submit_order(
            &opp.exchange_ticker,
            OrderSide::Yes,
            action,
            shares,
            "limit",
            price_cents,
            &client_order_id,
        )
        .await
        .context("order submission failed")?;

    println!("order placed: {}", result);
    println!("\nremember to place the sportsbook hedge manually");
    Ok(())
}

fn show_alerts(config: &Config, last: usize) -> Result<()> {
    let repo = Repository::open(&config.database_path)?;
    let alerts = repo.recent_alerts(last)?;
    if alerts.is_empty() {
        println!("no alerts found");
        return Ok(());
    }

    println!(
        "{:<12} {:<26} {:<14} {:>8} {:>5} {:>8} {:>9}",
        "Time", "Market", "Direction", "Edge", "Conf", "Price", "Book Prob"
    );
    for alert in alerts {
        println!(
            "{:<12} {:<26} {:<14} {:>6.0}bp {:>5} {:>8.3} {:>9.3}",
            alert.timestamp.format("%m-%d %H:%M"),
            truncate_str(&alert.market_key, 26),
            alert.direction.as_str(),
            alert.edge_bps,
            alert.confidence.as_str(),
            alert.exchange_price,
            alert.book_p_no_vig,
        );
    }
    Ok(())
}

// ── Runner commands ─────────────────────────────────────────────────────

async fn runner_run(mut config: Config, mode: Option<String>) -> Result<()> {
    if let Some(mode_str) = mode {
        config.mode = TradingMode::parse(&mode_str)
            .with_context(|| format!("invalid mode '{}'", mode_str))?;
    }

    let repository = Arc::new(Repository::open(&config.database_path)?);
    let client: Arc<dyn ExchangeClient> = if config.exchange_configured() {
        exchange_client(&config)?
    } else {
        info!("no exchange credentials, using mock client");
        Arc::new(MockExchangeClient::default())
    };

    let runner = TradingRunner::new(config, client, repository);
    let summary = runner.run().await;

    if let Some(report) = &summary.report {
        println!("{}", report);
    } else {
        println!(
            "run complete: {}/{} orders filled, {} errors",
            summary.orders_filled,
            summary.orders_placed,
            summary.errors.len()
        );
    }
    Ok(())
}

async fn runner_snapshot(config: Config, tickers: Vec<String>) -> Result<()> {
    if tickers.is_empty() {
        anyhow::bail!("no tickers given; use --tickers A,B,C");
    }

    let repository = Arc::new(Repository::open(&config.database_path)?);
    let client: Arc<dyn ExchangeClient> = if config.exchange_configured() {
        exchange_client(&config)?
    } else {
        Arc::new(MockExchangeClient::default())
    };

    let runner = TradingRunner::new(config, client, repository);
    let captured = runner.run_snapshot_only(&tickers).await?;
    println!("captured {} snapshots", captured);
    Ok(())
}

fn runner_report(config: &Config, date: &str) -> Result<()> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", date))?;

    let repo = Repository::open(&config.database_path)?;
    let pnl = repo
        .get_daily_pnl(date)?
        .with_context(|| format!("no P&L record for {}", date))?;

    let summary = RunSummary::new(config.mode.as_str());
    println!("{}", generate_daily_report(&summary, &pnl));
    Ok(())
}
