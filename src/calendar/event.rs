//! Calendar event types and identity derivation

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Market impact classification of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
}

impl ImpactLevel {
    /// Marker used in notification text
    pub fn marker(&self) -> &'static str {
        match self {
            ImpactLevel::High => "🔴",
            ImpactLevel::Medium => "🟡",
            ImpactLevel::Low => "⚪",
        }
    }
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImpactLevel::High => "High",
            ImpactLevel::Medium => "Medium",
            ImpactLevel::Low => "Low",
        };
        f.write_str(s)
    }
}

impl FromStr for ImpactLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(ImpactLevel::High),
            "medium" => Ok(ImpactLevel::Medium),
            "low" => Ok(ImpactLevel::Low),
            other => Err(format!("unknown impact level: {}", other)),
        }
    }
}

/// Release status as shown to the frontend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Upcoming,
    Completed,
}

/// Identity of an event across scrape cycles.
///
/// Built from country, normalized title and the scheduled instant in UTC.
/// Title normalization trims, collapses inner whitespace and lowercases;
/// any other rewording upstream produces a different key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey(String);

impl EventKey {
    pub fn derive(country: &str, title: &str, scheduled_time: DateTime<Utc>) -> Self {
        Self(format!(
            "{}|{}|{}",
            country.trim().to_ascii_uppercase(),
            normalize_title(title),
            scheduled_time.format("%Y-%m-%dT%H:%M:%SZ")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short stable identifier for external consumers
    pub fn short_id(&self) -> String {
        format!("{:016x}", fxhash::hash64(self.0.as_bytes()))
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// One record as produced by the calendar source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub country: String,
    pub title: String,
    pub scheduled_time: DateTime<Utc>,
    pub impact: ImpactLevel,
    #[serde(default)]
    pub forecast: Option<String>,
    #[serde(default)]
    pub actual: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
}

impl RawEvent {
    pub fn key(&self) -> EventKey {
        EventKey::derive(&self.country, &self.title, self.scheduled_time)
    }
}

/// A tracked calendar event with its notification flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub country: String,
    pub title: String,
    pub scheduled_time: DateTime<Utc>,
    pub impact: ImpactLevel,
    #[serde(default)]
    pub forecast: Option<String>,
    #[serde(default)]
    pub actual: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub warning_sent: bool,
    #[serde(default)]
    pub release_sent: bool,
}

impl Event {
    /// First sighting of a scraped record; both flags start cleared
    pub fn from_raw(raw: RawEvent) -> Self {
        let id = raw.key().short_id();
        let mut event = Self {
            id,
            country: raw.country,
            title: raw.title,
            scheduled_time: raw.scheduled_time,
            impact: raw.impact,
            forecast: clean_value(raw.forecast),
            actual: clean_value(raw.actual),
            previous: clean_value(raw.previous),
            status: EventStatus::Upcoming,
            warning_sent: false,
            release_sent: false,
        };
        event.refresh_status();
        event
    }

    pub fn key(&self) -> EventKey {
        EventKey::derive(&self.country, &self.title, self.scheduled_time)
    }

    /// Refresh the mutable fields from a later scrape of the same event.
    ///
    /// Flags are never touched. A known `actual` is not cleared by a scrape
    /// that momentarily lacks it.
    pub fn update_from(&mut self, raw: &RawEvent) {
        self.impact = raw.impact;
        if let Some(forecast) = clean_value(raw.forecast.clone()) {
            self.forecast = Some(forecast);
        }
        if let Some(actual) = clean_value(raw.actual.clone()) {
            self.actual = Some(actual);
        }
        if let Some(previous) = clean_value(raw.previous.clone()) {
            self.previous = Some(previous);
        }
        self.refresh_status();
    }

    pub fn is_released(&self) -> bool {
        self.actual.is_some()
    }

    fn refresh_status(&mut self) {
        self.status = if self.is_released() {
            EventStatus::Completed
        } else {
            EventStatus::Upcoming
        };
    }
}

/// Treat blank cells (including a lone non-breaking space) as absent
fn clean_value(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim_matches(|c: char| c.is_whitespace() || c == '\u{a0}');
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Parse a calendar figure such as `4.15M`, `-250K`, `3.2%` or `1,234.5`.
///
/// Magnitude suffixes are expanded; a percent sign is dropped so percent
/// figures compare with each other directly.
pub fn parse_figure(value: &str) -> Option<f64> {
    static FIGURE: OnceLock<Regex> = OnceLock::new();
    let re = FIGURE.get_or_init(|| {
        Regex::new(r"^([+-]?\d+(?:\.\d+)?)([KMBT%]?)$").expect("valid figure pattern")
    });

    let compact: String = value.chars().filter(|c| *c != ',' && *c != ' ').collect();
    let caps = re.captures(&compact)?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;
    let scale = match caps.get(2).map(|m| m.as_str()) {
        Some("K") => 1e3,
        Some("M") => 1e6,
        Some("B") => 1e9,
        Some("T") => 1e12,
        _ => 1.0,
    };
    Some(number * scale)
}
