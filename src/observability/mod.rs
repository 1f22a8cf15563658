//! Operator-facing side channels: webhook alerts and the daily report.

pub mod alerts;
pub mod report;

pub use alerts::AlertChannel;
pub use report::generate_daily_report;
