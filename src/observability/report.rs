//! Daily performance report.

use crate::models::DailyPnl;
use crate::runner::RunSummary;

/// Render the end-of-day report as plain text.
pub fn generate_daily_report(summary: &RunSummary, daily_pnl: &DailyPnl) -> String {
    let mut lines = vec![
        "=".repeat(60),
        format!("DAILY TRADING REPORT - {}", daily_pnl.date.format("%Y-%m-%d")),
        "=".repeat(60),
        String::new(),
        "TRADING SUMMARY".to_string(),
        "-".repeat(40),
        format!("Mode: {}", summary.mode),
        format!("Markets Discovered: {}", summary.markets_discovered),
        format!("Markets Tradeable: {}", summary.markets_tradeable),
        format!("Signals Generated: {}", summary.signals_generated),
        format!("Signals Valid: {}", summary.signals_valid),
        format!("Orders Placed: {}", summary.orders_placed),
        format!("Orders Filled: {}", summary.orders_filled),
        String::new(),
        "P&L BREAKDOWN".to_string(),
        "-".repeat(40),
        format!("Realized P&L: ${:+.2}", daily_pnl.realized_pnl),
        format!("Unrealized P&L: ${:+.2}", daily_pnl.unrealized_pnl),
        format!("Fees: ${:.2}", daily_pnl.fees),
        format!("Total P&L: ${:+.2}", daily_pnl.total_pnl()),
        String::new(),
        "PERFORMANCE".to_string(),
        "-".repeat(40),
        format!("Trades Placed: {}", daily_pnl.trades_placed),
        format!("Trades Filled: {}", daily_pnl.trades_filled),
        format!("Trades Won: {}", daily_pnl.trades_won),
        format!("Trades Lost: {}", daily_pnl.trades_lost),
        match daily_pnl.win_rate() {
            Some(rate) => format!("Win Rate: {:.1}%", rate * 100.0),
            None => "Win Rate: N/A".to_string(),
        },
        String::new(),
        "RISK".to_string(),
        "-".repeat(40),
        format!("Peak Exposure: ${:.2}", daily_pnl.peak_exposure),
        format!("Ending Exposure: ${:.2}", daily_pnl.ending_exposure),
        format!(
            "Markets Traded: {}",
            if daily_pnl.markets_traded.is_empty() {
                "None".to_string()
            } else {
                daily_pnl.markets_traded.join(", ")
            }
        ),
        String::new(),
    ];

    if !summary.errors.is_empty() {
        lines.push("ERRORS".to_string());
        lines.push("-".repeat(40));
        for error in &summary.errors {
            lines.push(format!("  - {}", error));
        }
        lines.push(String::new());
    }

    lines.push(format!("Duration: {:.1}s", summary.duration_seconds));
    lines.push("=".repeat(60));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_report_contents() {
        let mut summary = RunSummary::new("paper");
        summary.markets_discovered = 12;
        summary.orders_placed = 3;
        summary.orders_filled = 2;
        summary.errors.push("one transient error".to_string());
        summary.duration_seconds = 42.5;

        let mut pnl = DailyPnl::new(NaiveDate::from_ymd_opt(2026, 2, 7).unwrap());
        pnl.realized_pnl = 4.20;
        pnl.trades_won = 2;
        pnl.trades_lost = 1;
        pnl.markets_traded = vec!["A".into(), "B".into()];

        let report = generate_daily_report(&summary, &pnl);
        assert!(report.contains("2026-02-07"));
        assert!(report.contains("Orders Placed: 3"));
        assert!(report.contains("Realized P&L: $+4.20"));
        assert!(report.contains("Win Rate: 66.7%"));
        assert!(report.contains("Markets Traded: A, B"));
        assert!(report.contains("one transient error"));
    }
}
