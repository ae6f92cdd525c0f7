//! Radar configuration, read once at process start
//!
//! Environment variables:
//! - RADAR_DATA_DIR: directory for calendar_data.json / metrics_data.json (default: ./data)
//! - RADAR_WINDOW_DAYS: rolling window in days (default: 28)
//! - RADAR_WARNING_HOURS: advance warning lead time (default: 12)
//! - RADAR_HTTP_TIMEOUT_SECS: timeout for every outbound request (default: 30)
//! - RADAR_CALENDAR_CURRENCY: calendar currency filter (default: USD)
//! - RADAR_CALENDAR_MIN_IMPACT: Low, Medium or High (default: Medium)
//! - RADAR_CALENDAR_TZ_ID / RADAR_CALENDAR_UTC_OFFSET: calendar timezone (default: 8 / +8, offset -12..=14)
//! - RADAR_METRICS_FILE: JSON metric table (default: built-in table)
//! - TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID: Telegram delivery
//! - RADAR_WEBHOOK_URL: extra webhook target
//! - FRED_API_KEY: key for FRED series

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::calendar::{ImpactLevel, ScraperConfig, DEFAULT_WARNING_HOURS, DEFAULT_WINDOW_DAYS};
use crate::error::ConfigError;
use crate::metrics::{default_metrics, MetricDefinition, MetricTable, ThresholdConfig};
use crate::notify::NotifyTarget;

#[derive(Debug, Clone)]
pub struct RadarConfig {
    pub data_dir: PathBuf,
    pub window_days: i64,
    pub warning_hours: i64,
    pub http_timeout: Duration,
    pub scraper: ScraperConfig,
    pub metrics: Vec<MetricDefinition>,
    pub thresholds: ThresholdConfig,
    pub targets: Vec<NotifyTarget>,
    pub fred_api_key: Option<String>,
}

impl RadarConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parse_or = |key: &str, default: i64| -> i64 {
            get(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        };

        let window_days = parse_or("RADAR_WINDOW_DAYS", DEFAULT_WINDOW_DAYS).max(1);
        let warning_hours = parse_or("RADAR_WARNING_HOURS", DEFAULT_WARNING_HOURS).max(1);
        let http_timeout = Duration::from_secs(parse_or("RADAR_HTTP_TIMEOUT_SECS", 30).max(1) as u64);

        let mut scraper = ScraperConfig {
            timeout: http_timeout,
            ..ScraperConfig::default()
        };
        if let Some(currency) = get("RADAR_CALENDAR_CURRENCY") {
            scraper.currency = currency.trim().to_ascii_uppercase();
        }
        if let Some(impact) = get("RADAR_CALENDAR_MIN_IMPACT") {
            scraper.min_impact = ImpactLevel::from_str(&impact).map_err(|_| ConfigError::InvalidValue {
                key: "RADAR_CALENDAR_MIN_IMPACT".to_string(),
                value: impact.clone(),
            })?;
        }
        if let Some(tz) = get("RADAR_CALENDAR_TZ_ID") {
            scraper.timezone_id = tz;
        }
        if let Some(raw) = get("RADAR_CALENDAR_UTC_OFFSET") {
            scraper.utc_offset_hours = raw
                .trim()
                .parse::<i32>()
                .ok()
                .filter(|hours| (-12..=14).contains(hours))
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "RADAR_CALENDAR_UTC_OFFSET".to_string(),
                    value: raw.clone(),
                })?;
        }

        let metrics = match get("RADAR_METRICS_FILE") {
            Some(path) => load_metric_table(&path)?,
            None => default_metrics(),
        };
        let thresholds = ThresholdConfig::from_definitions(&metrics)?;

        let mut targets = Vec::new();
        if let (Some(bot_token), Some(chat_id)) = (get("TELEGRAM_BOT_TOKEN"), get("TELEGRAM_CHAT_ID")) {
            targets.push(NotifyTarget::Telegram { bot_token, chat_id });
        }
        if let Some(url) = get("RADAR_WEBHOOK_URL") {
            targets.push(NotifyTarget::Webhook {
                url,
                headers: Default::default(),
            });
        }
        if targets.is_empty() {
            tracing::warn!("No Telegram credentials or webhook configured, notifications go to the log");
            targets.push(NotifyTarget::Log);
        }

        Ok(Self {
            data_dir: PathBuf::from(get("RADAR_DATA_DIR").unwrap_or_else(|| "./data".to_string())),
            window_days,
            warning_hours,
            http_timeout,
            scraper,
            metrics,
            thresholds,
            targets,
            fred_api_key: get("FRED_API_KEY"),
        })
    }
}

fn load_metric_table(path: &str) -> Result<Vec<MetricDefinition>, ConfigError> {
    let data = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    let table: MetricTable =
        serde_json::from_slice(&data).map_err(|e| ConfigError::InvalidMetrics(e.to_string()))?;
    Ok(table.metrics)
}
