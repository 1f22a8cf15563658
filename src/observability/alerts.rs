//! Alert delivery over a webhook.
//!
//! One operation: `deliver(level, title, message)`. Failures are logged and
//! swallowed; alerting must never take the trading cycle down.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

/// Webhook payload cap; longer messages are truncated.
const MAX_MESSAGE_CHARS: usize = 3_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl AlertLevel {
    fn emoji(&self) -> &str {
        match self {
            AlertLevel::Info => "\u{2139}\u{fe0f}",
            AlertLevel::Warning => "\u{26a0}\u{fe0f}",
            AlertLevel::Error => "\u{1f6a8}",
            AlertLevel::Success => "\u{2705}",
        }
    }

    fn label(&self) -> &str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Error => "ERROR",
            AlertLevel::Success => "SUCCESS",
        }
    }
}

pub struct AlertChannel {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl AlertChannel {
    pub fn new(webhook_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            webhook_url,
            client,
        }
    }

    /// Send an alert. Returns true when the webhook accepted it.
    pub async fn deliver(&self, level: AlertLevel, title: &str, message: &str) -> bool {
        let url = match &self.webhook_url {
            Some(url) => url,
            None => {
                debug!("alert skipped, no webhook configured: {}", title);
                return false;
            }
        };

        let message = truncate(message, MAX_MESSAGE_CHARS);
        let payload = json!({
            "text": format!("{} *{} ({})*\n{}", level.emoji(), title, level.label(), message),
            "username": "edgebot",
        });

        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("alert webhook returned {}", response.status());
                false
            }
            Err(e) => {
                warn!("alert delivery failed: {}", e);
                false
            }
        }
    }
}

fn truncate(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let truncated: String = message.chars().take(max_chars).collect();
    format!("{}…", truncated)
}
