//! Configuration module for HolderPulse

use chrono::Duration;
use std::env;
use thiserror::Error;

use crate::modules::growth_evaluator::{WindowKind, WindowSpec};

const DEFAULT_WINDOWS: &str = "vs_previous:30,1h:50,3h:75,12h:100,24h:150";

/// Upper bound for every configured span (100 years)
const MAX_SPAN_HOURS: i64 = 24 * 365 * 100;
const MAX_SPAN_MINUTES: i64 = MAX_SPAN_HOURS * 60;

/// Configuration errors surfaced before any I/O happens
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid growth window entry `{0}` (expected name:threshold)")]
    InvalidWindow(String),

    #[error("invalid look-back `{0}` (expected vs_previous, <N>h or <N>m)")]
    InvalidLookBack(String),

    #[error("invalid threshold `{value}` for window `{window}`")]
    InvalidThreshold { window: String, value: String },

    #[error("duplicate growth window `{0}`")]
    DuplicateWindow(String),

    #[error("no growth windows configured")]
    NoWindows,

    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),

    #[error("{0} exceeds the maximum span of 100 years")]
    TooLarge(&'static str),
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub db_path: String,

    // Token API (Ethplorer)
    pub api_url: String,
    pub api_key: String,
    pub request_pause_ms: u64,
    pub request_timeout_secs: u64,

    // Growth evaluation
    pub windows: Vec<WindowSpec>,
    pub reference_tolerance_minutes: i64,
    pub synthetic_previous_count: Option<i64>,

    // Alert gate
    pub alert_limit_count: u32,
    pub alert_limit_hours: i64,

    // Retention
    pub retention_hours: i64,

    // Telegram Alerts
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    // Metrics
    pub metrics_file: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let windows = parse_windows(
            &env::var("GROWTH_WINDOWS").unwrap_or_else(|_| DEFAULT_WINDOWS.to_string()),
        )?;

        let config = Self {
            db_path: env::var("HOLDERPULSE_DB_PATH")
                .unwrap_or_else(|_| "data/holderpulse.db".to_string()),

            api_url: env::var("ETHPLORER_API_URL")
                .unwrap_or_else(|_| "https://api.ethplorer.io".to_string()),
            api_key: env::var("ETHPLORER_API_KEY")
                .ok()
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| "freekey".to_string()),
            request_pause_ms: parse_var("REQUEST_PAUSE_MS", 1000),
            request_timeout_secs: parse_var("REQUEST_TIMEOUT_SECS", 15),

            windows,
            reference_tolerance_minutes: parse_var("REFERENCE_TOLERANCE_MINUTES", 10),
            synthetic_previous_count: env::var("SYNTHETIC_PREVIOUS_COUNT")
                .ok()
                .and_then(|v| v.parse().ok()),

            alert_limit_count: parse_var("ALERT_LIMIT_COUNT", 3),
            alert_limit_hours: parse_var("ALERT_LIMIT_HOURS", 24),

            retention_hours: parse_var("RETENTION_HOURS", 72),

            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),

            metrics_file: env::var("METRICS_FILE").ok().filter(|p| !p.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engines cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.windows.is_empty() {
            return Err(ConfigError::NoWindows);
        }
        if self.alert_limit_count == 0 {
            return Err(ConfigError::NonPositive("ALERT_LIMIT_COUNT"));
        }
        if self.alert_limit_hours <= 0 {
            return Err(ConfigError::NonPositive("ALERT_LIMIT_HOURS"));
        }
        if self.retention_hours <= 0 {
            return Err(ConfigError::NonPositive("RETENTION_HOURS"));
        }
        if self.reference_tolerance_minutes <= 0 {
            return Err(ConfigError::NonPositive("REFERENCE_TOLERANCE_MINUTES"));
        }

        if self.alert_limit_hours > MAX_SPAN_HOURS {
            return Err(ConfigError::TooLarge("ALERT_LIMIT_HOURS"));
        }
        if self.retention_hours > MAX_SPAN_HOURS {
            return Err(ConfigError::TooLarge("RETENTION_HOURS"));
        }
        if self.reference_tolerance_minutes > MAX_SPAN_MINUTES {
            return Err(ConfigError::TooLarge("REFERENCE_TOLERANCE_MINUTES"));
        }
        Ok(())
    }

    // Clamped to the validated range

    pub fn reference_tolerance(&self) -> Duration {
        Duration::minutes(self.reference_tolerance_minutes.clamp(0, MAX_SPAN_MINUTES))
    }

    pub fn alert_limit_window(&self) -> Duration {
        Duration::hours(self.alert_limit_hours.clamp(0, MAX_SPAN_HOURS))
    }

    pub fn retention_horizon(&self) -> Duration {
        Duration::hours(self.retention_hours.clamp(0, MAX_SPAN_HOURS))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "data/holderpulse.db".to_string(),
            api_url: "https://api.ethplorer.io".to_string(),
            api_key: "freekey".to_string(),
            request_pause_ms: 1000,
            request_timeout_secs: 15,
            windows: parse_windows(DEFAULT_WINDOWS).unwrap_or_default(),
            reference_tolerance_minutes: 10,
            synthetic_previous_count: None,
            alert_limit_count: 3,
            alert_limit_hours: 24,
            retention_hours: 72,
            telegram_bot_token: None,
            telegram_chat_id: None,
            metrics_file: None,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse a `name:threshold` list such as `vs_previous:30,1h:50,90m:60`.
///
/// A window named `vs_previous` (or `previous`) compares against the latest
/// earlier snapshot; every other name is read as a look-back duration.
pub fn parse_windows(raw: &str) -> Result<Vec<WindowSpec>, ConfigError> {
    let mut windows: Vec<WindowSpec> = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, threshold) = entry
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidWindow(entry.to_string()))?;
        let name = name.trim();
        let threshold = threshold.trim();

        let kind = parse_kind(name)?;
        let threshold_percent: f64 = threshold
            .parse()
            .ok()
            .filter(|t: &f64| !t.is_nan() && *t >= 0.0)
            .ok_or_else(|| ConfigError::InvalidThreshold {
                window: name.to_string(),
                value: threshold.to_string(),
            })?;

        if windows.iter().any(|w| w.name == name) {
            return Err(ConfigError::DuplicateWindow(name.to_string()));
        }

        windows.push(WindowSpec {
            name: name.to_string(),
            kind,
            threshold_percent,
        });
    }

    if windows.is_empty() {
        return Err(ConfigError::NoWindows);
    }
    Ok(windows)
}

fn parse_kind(name: &str) -> Result<WindowKind, ConfigError> {
    if name == "vs_previous" || name == "previous" {
        return Ok(WindowKind::Previous);
    }

    let invalid = || ConfigError::InvalidLookBack(name.to_string());
    let bounded = |amount: &str, max: i64| {
        amount
            .parse::<i64>()
            .ok()
            .filter(|a| *a > 0 && *a <= max)
            .ok_or_else(invalid)
    };

    if let Some(hours) = name.strip_suffix('h') {
        Ok(WindowKind::LookBack(Duration::hours(bounded(hours, MAX_SPAN_HOURS)?)))
    } else if let Some(minutes) = name.strip_suffix('m') {
        Ok(WindowKind::LookBack(Duration::minutes(bounded(minutes, MAX_SPAN_MINUTES)?)))
    } else {
        Err(invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_windows() {
        let windows = parse_windows(DEFAULT_WINDOWS).unwrap();
        let names: Vec<_> = windows.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["vs_previous", "1h", "3h", "12h", "24h"]);
        assert_eq!(windows[0].kind, WindowKind::Previous);
        assert_eq!(windows[2].kind, WindowKind::LookBack(Duration::hours(3)));
        assert_eq!(windows[4].threshold_percent, 150.0);
    }

    #[test]
    fn test_minute_lookback_and_whitespace() {
        let windows = parse_windows(" 90m : 12.5 , previous:inf ").unwrap();
        assert_eq!(windows[0].kind, WindowKind::LookBack(Duration::minutes(90)));
        assert_eq!(windows[0].threshold_percent, 12.5);
        assert_eq!(windows[1].kind, WindowKind::Previous);
        assert!(windows[1].threshold_percent.is_infinite());
    }

    #[test]
    fn test_rejects_bad_entries() {
        assert!(matches!(parse_windows("1h"), Err(ConfigError::InvalidWindow(_))));
        assert!(matches!(parse_windows("1d:20"), Err(ConfigError::InvalidLookBack(_))));
        assert!(matches!(parse_windows("0h:20"), Err(ConfigError::InvalidLookBack(_))));
        assert!(matches!(parse_windows("h:20"), Err(ConfigError::InvalidLookBack(_))));
        assert!(matches!(
            parse_windows("1h:-5"),
            Err(ConfigError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            parse_windows("1h:10,1h:20"),
            Err(ConfigError::DuplicateWindow(_))
        ));
        assert!(matches!(parse_windows(" , "), Err(ConfigError::NoWindows)));
    }

    #[test]
    fn test_rejects_out_of_range_lookback() {
        for raw in ["10000000000000h:10", "100000000000h:10", "876001h:10", "9999999999999m:5"] {
            assert!(
                matches!(parse_windows(raw), Err(ConfigError::InvalidLookBack(_))),
                "{raw} should be rejected"
            );
        }
        let windows = parse_windows("876000h:10").unwrap();
        assert_eq!(windows[0].kind, WindowKind::LookBack(Duration::hours(MAX_SPAN_HOURS)));
    }

    #[test]
    fn test_validate_rejects_huge_spans() {
        let config = Config {
            retention_hours: 10_000_000_000,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::TooLarge("RETENTION_HOURS"))));
        assert_eq!(config.retention_horizon(), Duration::hours(MAX_SPAN_HOURS));

        let config = Config {
            alert_limit_hours: i64::MAX,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::TooLarge("ALERT_LIMIT_HOURS"))));
        assert_eq!(config.alert_limit_window(), Duration::hours(MAX_SPAN_HOURS));

        let config = Config {
            reference_tolerance_minutes: i64::MAX,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooLarge("REFERENCE_TOLERANCE_MINUTES"))
        ));
    }

    #[test]
    fn test_validate_limits() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.alert_limit_count = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive("ALERT_LIMIT_COUNT"))
        ));
    }
}
