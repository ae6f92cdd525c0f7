//! Threshold crossing detection against the last persisted reading

use chrono::{DateTime, Utc};

use super::threshold::{ComparisonMode, ThresholdRule};
use crate::notify::{MetricChangeNotice, NotificationIntent};
use crate::store::{MetricSnapshot, MetricSnapshotStore};

/// Compares each new reading with the value stored by the previous run.
///
/// The baseline is always the previous run's value, not the value at the last
/// notification, so a slow drift made of sub-threshold steps never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricChangeDetector;

impl MetricChangeDetector {
    /// Evaluate one reading.
    ///
    /// Returns the intent to send, if the rule was crossed, and the snapshot
    /// that should replace the stored one. The store itself is not modified.
    pub fn evaluate(
        &self,
        name: &str,
        new_value: f64,
        store: &MetricSnapshotStore,
        rule: &ThresholdRule,
        now: DateTime<Utc>,
    ) -> (Option<NotificationIntent>, MetricSnapshot) {
        let snapshot = MetricSnapshot {
            value: new_value,
            observed_at: now,
        };

        let Some(last) = store.get(name) else {
            tracing::info!(metric = %name, value = new_value, "First reading, recording baseline");
            return (None, snapshot);
        };

        let change_percent = if last.value != 0.0 {
            Some((new_value - last.value) * 100.0 / last.value.abs())
        } else {
            None
        };

        let fired = match rule.mode {
            ComparisonMode::AbsoluteAnyChange => new_value != last.value,
            ComparisonMode::RelativePercent => match change_percent {
                Some(pct) => pct.abs() >= rule.threshold,
                // Any move off a zero baseline is an unbounded relative change
                None => new_value != 0.0,
            },
        };

        tracing::debug!(
            metric = %name,
            previous = last.value,
            current = new_value,
            fired,
            "Evaluated metric"
        );

        let intent = fired.then(|| {
            NotificationIntent::MetricChange(MetricChangeNotice {
                metric: name.to_string(),
                previous: last.value,
                current: new_value,
                change_percent,
                mode: rule.mode,
                threshold: rule.threshold,
                observed_at: now,
            })
        });

        (intent, snapshot)
    }
}
