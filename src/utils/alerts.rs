//! Alert delivery for Telegram or the log stream

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::modules::growth_evaluator::GrowthReport;

/// Alert payload for one triggered entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthAlert {
    pub label: String,
    pub entity_id: String,
    pub current_holders: i64,
    /// `growth_<window>` -> formatted percentage such as `"42.86%"`
    #[serde(flatten)]
    pub growth: BTreeMap<String, String>,
    /// Windows that met their threshold
    pub crossed: Vec<String>,
    pub observed_at: DateTime<Utc>,
}

impl GrowthAlert {
    pub fn from_report(report: &GrowthReport, label: &str) -> Self {
        let growth = report
            .windows
            .iter()
            .map(|w| (format!("growth_{}", w.name), format!("{:.2}%", w.growth_percent)))
            .collect();

        Self {
            label: label.to_string(),
            entity_id: report.entity_id.clone(),
            current_holders: report.current_count,
            growth,
            crossed: report.crossed_windows().map(|w| w.name.clone()).collect(),
            observed_at: report.evaluated_at,
        }
    }

    pub fn growth_field(&self, window: &str) -> Option<&str> {
        self.growth
            .get(&format!("growth_{}", window))
            .map(String::as_str)
    }

    /// Legacy-Markdown body used for chat delivery. Free text (label, window
    /// names) is escaped; only the header and the contract span are entities.
    pub fn message(&self) -> String {
        let title = if self.label.is_empty() {
            self.entity_id.as_str()
        } else {
            self.label.as_str()
        };

        let mut lines = vec![
            format!("📈 *Holder growth* {}", escape_markdown(title)),
            String::new(),
            format!("Contract: `{}`", self.entity_id.replace('`', "")),
            format!("Holders: {}", format_count(self.current_holders)),
        ];
        for (key, value) in &self.growth {
            let window = key.trim_start_matches("growth_");
            let marker = if self.crossed.iter().any(|c| c == window) {
                " 🔥"
            } else {
                ""
            };
            lines.push(format!("{}: {}{}", escape_markdown(window), value, marker));
        }
        lines.push(String::new());
        lines.push(self.observed_at.format("%Y-%m-%d %H:%M:%S UTC").to_string());
        lines.join("\n")
    }
}

/// Backslash-escape the characters Telegram legacy Markdown treats as
/// entity markers
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Delivers alerts to an external channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &GrowthAlert) -> Result<()>;
}

/// Telegram Bot API delivery
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        info!(target: "NOTIFIER", "Telegram bot initialized");
        Self {
            client: reqwest::Client::new(),
            bot_token,
            chat_id,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, alert: &GrowthAlert) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let params = serde_json::json!({
            "chat_id": self.chat_id,
            "text": alert.message(),
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
        });

        self.client
            .post(&url)
            .json(&params)
            .send()
            .await?
            .error_for_status()?;

        info!(target: "NOTIFIER", entity = %alert.entity_id, "Telegram alert delivered");
        Ok(())
    }
}

/// Fallback when no chat channel is configured: the alert is a log line
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &GrowthAlert) -> Result<()> {
        let payload = serde_json::to_string(alert)?;
        info!(target: "NOTIFIER", entity = %alert.entity_id, %payload, "Growth alert");
        Ok(())
    }
}

/// Telegram when both token and chat id are set, otherwise log-only
pub fn notifier_from_config(config: &Config) -> Arc<dyn Notifier> {
    match (&config.telegram_bot_token, &config.telegram_chat_id) {
        (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
            Arc::new(TelegramNotifier::new(token.clone(), chat_id.clone()))
        }
        _ => {
            info!(target: "NOTIFIER", "Telegram not configured, alerts go to the log");
            Arc::new(LogNotifier)
        }
    }
}

/// `4512331` -> `"4,512,331"`
pub fn format_count(count: i64) -> String {
    let digits = count.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if count < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::growth_evaluator::WindowGrowth;
    use chrono::TimeZone;

    fn report() -> GrowthReport {
        let window = |name: &str, growth: f64, crossed: bool| WindowGrowth {
            name: name.to_string(),
            reference: Some(105),
            reference_at: None,
            growth_percent: growth,
            threshold_percent: 30.0,
            crossed,
        };
        GrowthReport {
            entity_id: "0xabc".to_string(),
            current_count: 150,
            evaluated_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            windows: vec![
                window("vs_previous", 300.0 / 7.0, true),
                window("1h", 0.0, false),
            ],
            triggered: true,
        }
    }

    #[test]
    fn test_payload_fields() {
        let alert = GrowthAlert::from_report(&report(), "TKN");
        assert_eq!(alert.growth_field("vs_previous"), Some("42.86%"));
        assert_eq!(alert.growth_field("1h"), Some("0.00%"));
        assert_eq!(alert.crossed, vec!["vs_previous".to_string()]);

        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["growth_vs_previous"], "42.86%");
        assert_eq!(json["entity_id"], "0xabc");
        assert_eq!(json["label"], "TKN");
    }

    /// Every `_`, `*` or backtick outside the header and code spans must be escaped
    fn assert_markers_escaped(message: &str) {
        let body = message.replacen("*Holder growth*", "", 1);
        let mut in_code = false;
        let mut escaped = false;
        for ch in body.chars() {
            if escaped {
                escaped = false;
                continue;
            }
            match ch {
                '\\' if !in_code => escaped = true,
                '`' => in_code = !in_code,
                '_' | '*' | '[' if !in_code => panic!("unescaped `{}` in {:?}", ch, message),
                _ => {}
            }
        }
        assert!(!in_code, "unterminated code span in {:?}", message);
    }

    #[test]
    fn test_message_marks_crossed_windows() {
        let message = GrowthAlert::from_report(&report(), "").message();
        assert!(message.starts_with("📈 *Holder growth* 0xabc"));
        assert!(message.contains("vs\\_previous: 42.86% 🔥"));
        assert!(message.contains("\n1h: 0.00%\n"));
        assert!(message.ends_with("2024-05-01 12:00:00 UTC"));
    }

    #[test]
    fn test_message_escapes_markdown_markers() {
        assert_markers_escaped(&GrowthAlert::from_report(&report(), "USDT").message());

        let message = GrowthAlert::from_report(&report(), "MY_*TOKEN*`[x]").message();
        assert!(message.contains("MY\\_\\*TOKEN\\*\\`\\[x]"));
        assert_markers_escaped(&message);
    }

    #[test]
    fn test_escape_markdown() {
        assert_eq!(escape_markdown("plain 1h"), "plain 1h");
        assert_eq!(escape_markdown("a_b*c"), "a\\_b\\*c");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1000), "1,000");
        assert_eq!(format_count(4_512_331), "4,512,331");
        assert_eq!(format_count(-12_345), "-12,345");
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(LogNotifier
            .notify(&GrowthAlert::from_report(&report(), "TKN"))
            .await
            .is_ok());
    }
}
