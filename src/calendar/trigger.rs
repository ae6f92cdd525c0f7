//! Decide which event notifications fire in this run

use chrono::{DateTime, Duration, Utc};

use super::event::{parse_figure, Event, ImpactLevel};
use crate::notify::{Deviation, NotificationIntent, ReleaseNotice, WarningNotice};

/// Default lead time of the advance warning
pub const DEFAULT_WARNING_HOURS: i64 = 12;

/// The two per-event notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    Warning,
    Release,
}

impl Event {
    pub fn flag(&self, kind: FlagKind) -> bool {
        match kind {
            FlagKind::Warning => self.warning_sent,
            FlagKind::Release => self.release_sent,
        }
    }

    pub fn set_flag(&mut self, kind: FlagKind, sent: bool) {
        match kind {
            FlagKind::Warning => self.warning_sent = sent,
            FlagKind::Release => self.release_sent = sent,
        }
    }
}

/// Evaluates the warning and release triggers.
///
/// Only High-impact events produce intents. Each trigger fires at most once
/// per event: firing sets the matching flag on the event, and a set flag
/// suppresses the trigger from then on.
///
/// A warning fires only while the event is between zero and the lead time
/// away. An event first seen after its scheduled time gets no retroactive
/// warning.
#[derive(Debug, Clone)]
pub struct EventTriggerEvaluator {
    warning_lead: Duration,
}

impl Default for EventTriggerEvaluator {
    fn default() -> Self {
        Self::new(Duration::hours(DEFAULT_WARNING_HOURS))
    }
}

impl EventTriggerEvaluator {
    pub fn new(warning_lead: Duration) -> Self {
        Self { warning_lead }
    }

    pub fn evaluate(&self, events: &mut [Event], now: DateTime<Utc>) -> Vec<NotificationIntent> {
        let mut intents = Vec::new();

        for event in events.iter_mut().filter(|e| e.impact == ImpactLevel::High) {
            let until = event.scheduled_time - now;

            if !event.warning_sent && until >= Duration::zero() && until <= self.warning_lead {
                event.warning_sent = true;
                tracing::debug!(event_key = %event.key(), "Warning trigger fired");
                intents.push(NotificationIntent::Warning(WarningNotice {
                    key: event.key(),
                    title: event.title.clone(),
                    country: event.country.clone(),
                    scheduled_time: event.scheduled_time,
                    hours_remaining: until.num_seconds() as f64 / 3600.0,
                    forecast: event.forecast.clone(),
                    impact: event.impact,
                }));
            }

            if !event.release_sent {
                if let Some(actual) = event.actual.clone() {
                    event.release_sent = true;
                    tracing::debug!(event_key = %event.key(), "Release trigger fired");
                    intents.push(NotificationIntent::Release(ReleaseNotice {
                        key: event.key(),
                        title: event.title.clone(),
                        country: event.country.clone(),
                        scheduled_time: event.scheduled_time,
                        deviation: deviation(&actual, event.forecast.as_deref()),
                        actual,
                        forecast: event.forecast.clone(),
                        previous: event.previous.clone(),
                        impact: event.impact,
                    }));
                }
            }
        }

        intents
    }
}

/// Deviation of `actual` from `forecast`, when both are numeric and the forecast is non-zero
pub fn deviation(actual: &str, forecast: Option<&str>) -> Option<Deviation> {
    let forecast = parse_figure(forecast?)?;
    let actual = parse_figure(actual)?;
    if forecast == 0.0 {
        return None;
    }
    let absolute = actual - forecast;
    Some(Deviation {
        absolute,
        percent: absolute / forecast.abs() * 100.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::RawEvent;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 3, 0, 0).unwrap()
    }

    fn event(impact: ImpactLevel, offset: Duration, actual: Option<&str>) -> Event {
        Event::from_raw(RawEvent {
            country: "US".to_string(),
            title: "Existing Home Sales".to_string(),
            scheduled_time: now() + offset,
            impact,
            forecast: Some("4.15M".to_string()),
            actual: actual.map(String::from),
            previous: None,
        })
    }

    #[test]
    fn test_warning_fires_once_within_lead() {
        let evaluator = EventTriggerEvaluator::default();
        let mut events = vec![event(ImpactLevel::High, Duration::hours(11), None)];

        let intents = evaluator.evaluate(&mut events, now());
        assert_eq!(intents.len(), 1);
        match &intents[0] {
            NotificationIntent::Warning(w) => {
                assert_eq!(w.hours_remaining, 11.0);
                assert_eq!(w.forecast.as_deref(), Some("4.15M"));
                assert_eq!(w.impact, ImpactLevel::High);
            }
            other => panic!("unexpected intent {:?}", other),
        }
        assert!(events[0].warning_sent);

        let again = evaluator.evaluate(&mut events, now() + Duration::hours(1));
        assert!(again.is_empty());
    }

    #[test]
    fn test_warning_waits_for_lead_window() {
        let evaluator = EventTriggerEvaluator::default();
        let mut events = vec![event(ImpactLevel::High, Duration::hours(13), None)];

        assert!(evaluator.evaluate(&mut events, now()).is_empty());
        assert!(!events[0].warning_sent);

        let intents = evaluator.evaluate(&mut events, now() + Duration::hours(1));
        assert_eq!(intents.len(), 1);
    }

    #[test]
    fn test_warning_boundaries() {
        let evaluator = EventTriggerEvaluator::default();
        let mut events = vec![
            event(ImpactLevel::High, Duration::hours(12), None),
            event(ImpactLevel::High, Duration::zero(), None),
        ];
        events[1].title = "CPI".to_string();

        let intents = evaluator.evaluate(&mut events, now());
        assert_eq!(intents.len(), 2);
    }

    #[test]
    fn test_past_event_gets_no_retroactive_warning() {
        let evaluator = EventTriggerEvaluator::default();
        let mut events = vec![event(ImpactLevel::High, Duration::hours(-2), Some("4.30M"))];

        let intents = evaluator.evaluate(&mut events, now());
        assert_eq!(intents.len(), 1);
        assert!(matches!(intents[0], NotificationIntent::Release(_)));
        assert!(!events[0].warning_sent);
        assert!(events[0].release_sent);
    }

    #[test]
    fn test_release_requires_actual() {
        let evaluator = EventTriggerEvaluator::default();
        let mut events = vec![event(ImpactLevel::High, Duration::hours(-1), None)];

        assert!(evaluator.evaluate(&mut events, now()).is_empty());
        assert!(!events[0].release_sent);
    }

    #[test]
    fn test_release_carries_deviation() {
        let evaluator = EventTriggerEvaluator::default();
        let mut events = vec![event(ImpactLevel::High, Duration::hours(-1), Some("4.30M"))];

        let intents = evaluator.evaluate(&mut events, now());
        match &intents[0] {
            NotificationIntent::Release(r) => {
                let dev = r.deviation.unwrap();
                assert!((dev.absolute - 150_000.0).abs() < 1e-3);
                assert!((dev.percent - 3.614_457_8).abs() < 1e-4);
            }
            other => panic!("unexpected intent {:?}", other),
        }
    }

    #[test]
    fn test_release_without_numeric_forecast_omits_deviation() {
        let evaluator = EventTriggerEvaluator::default();
        let mut e = event(ImpactLevel::High, Duration::hours(-1), Some("4.30M"));
        e.forecast = None;
        let mut events = vec![e];

        let intents = evaluator.evaluate(&mut events, now());
        match &intents[0] {
            NotificationIntent::Release(r) => assert!(r.deviation.is_none()),
            other => panic!("unexpected intent {:?}", other),
        }
    }

    #[test]
    fn test_non_high_impact_is_display_only() {
        let evaluator = EventTriggerEvaluator::default();
        let mut events = vec![
            event(ImpactLevel::Medium, Duration::hours(2), None),
            event(ImpactLevel::Low, Duration::hours(-2), Some("1.0%")),
        ];

        assert!(evaluator.evaluate(&mut events, now()).is_empty());
        assert!(events.iter().all(|e| !e.warning_sent && !e.release_sent));
    }

    #[test]
    fn test_deviation_edges() {
        assert!(deviation("1.0%", Some("0.0%")).is_none());
        assert!(deviation("1.0%", Some("n/a")).is_none());
        assert!(deviation("pending", Some("1.0%")).is_none());
        let neg = deviation("-0.2%", Some("-0.4%")).unwrap();
        assert!((neg.percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_flag_accessors() {
        let mut e = event(ImpactLevel::High, Duration::hours(1), None);
        e.set_flag(FlagKind::Release, true);
        assert!(e.flag(FlagKind::Release));
        assert!(!e.flag(FlagKind::Warning));
    }
}
