//! Notification intents produced by a run

use chrono::{DateTime, Utc};

use crate::calendar::{EventKey, FlagKind, ImpactLevel};
use crate::metrics::ComparisonMode;

/// Signed gap between a released figure and its forecast
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deviation {
    pub absolute: f64,
    /// `(actual - forecast) / |forecast| * 100`
    pub percent: f64,
}

/// A High-impact event is about to be released
#[derive(Debug, Clone, PartialEq)]
pub struct WarningNotice {
    pub key: EventKey,
    pub title: String,
    pub country: String,
    pub scheduled_time: DateTime<Utc>,
    pub hours_remaining: f64,
    pub forecast: Option<String>,
    pub impact: ImpactLevel,
}

/// A High-impact event has an actual figure
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseNotice {
    pub key: EventKey,
    pub title: String,
    pub country: String,
    pub scheduled_time: DateTime<Utc>,
    pub actual: String,
    pub forecast: Option<String>,
    pub previous: Option<String>,
    pub impact: ImpactLevel,
    /// Absent when either figure is non-numeric or the forecast is zero
    pub deviation: Option<Deviation>,
}

/// A tracked metric moved past its threshold since the last run
#[derive(Debug, Clone, PartialEq)]
pub struct MetricChangeNotice {
    pub metric: String,
    pub previous: f64,
    pub current: f64,
    /// Relative change in percent; absent when the baseline was zero
    pub change_percent: Option<f64>,
    pub mode: ComparisonMode,
    pub threshold: f64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationIntent {
    Warning(WarningNotice),
    Release(ReleaseNotice),
    MetricChange(MetricChangeNotice),
}

impl NotificationIntent {
    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationIntent::Warning(_) => "warning",
            NotificationIntent::Release(_) => "release",
            NotificationIntent::MetricChange(_) => "metric_change",
        }
    }

    /// What the intent is about: an event title or a metric name
    pub fn subject(&self) -> &str {
        match self {
            NotificationIntent::Warning(n) => &n.title,
            NotificationIntent::Release(n) => &n.title,
            NotificationIntent::MetricChange(n) => &n.metric,
        }
    }

    /// The event flag this intent sets when it fires, if any
    pub fn event_flag(&self) -> Option<(&EventKey, FlagKind)> {
        match self {
            NotificationIntent::Warning(n) => Some((&n.key, FlagKind::Warning)),
            NotificationIntent::Release(n) => Some((&n.key, FlagKind::Release)),
            NotificationIntent::MetricChange(_) => None,
        }
    }
}
