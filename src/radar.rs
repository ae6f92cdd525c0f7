//! One radar invocation
//!
//! A run loads both stores, pulls the feeds, decides what to notify,
//! dispatches, and only then commits. A sent-flag or a new metric baseline
//! reaches the store only after its notification was acknowledged, so a
//! failed send is retried by the next run instead of being lost.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::calendar::{
    group_by_week, EventMerger, EventSource, EventTriggerEvaluator, WeekBucket,
    DEFAULT_WARNING_HOURS, DEFAULT_WINDOW_DAYS,
};
use crate::clock::Clock;
use crate::error::RadarError;
use crate::metrics::{MetricChangeDetector, MetricDefinition, MetricSource, ThresholdConfig};
use crate::notify::{Dispatcher, NotificationIntent};
use crate::store::{EventStore, MetricSnapshotStore, PersistenceError, StateBackend, Versioned};

/// Outcome of committing one store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CommitStatus {
    /// Nothing changed, nothing written
    #[default]
    Unchanged,
    Committed,
    /// Another run wrote first; this run's changes were dropped
    Conflict,
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct CalendarReport {
    /// Size of the scraped batch, if the scrape succeeded
    pub fetched: Option<usize>,
    pub fetch_error: Option<String>,
    pub inserted: usize,
    pub updated: usize,
    pub evicted: usize,
    pub tracked: usize,
    pub buckets: BTreeMap<WeekBucket, usize>,
    pub commit: CommitStatus,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsReport {
    pub evaluated: usize,
    /// Metrics whose fetch failed this run
    pub skipped: Vec<String>,
    pub commit: CommitStatus,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub calendar: CalendarReport,
    pub metrics: MetricsReport,
    /// Intents acknowledged by the dispatcher
    pub sent: Vec<NotificationIntent>,
    /// Intents that failed to dispatch and will be retried
    pub failed: Vec<NotificationIntent>,
}

/// Wires the stores, feeds and dispatcher together for a run
pub struct Radar {
    backend: Arc<dyn StateBackend>,
    event_source: Arc<dyn EventSource>,
    metric_source: Arc<dyn MetricSource>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    metrics: Vec<MetricDefinition>,
    thresholds: ThresholdConfig,
    window_days: i64,
    merger: EventMerger,
    evaluator: EventTriggerEvaluator,
    detector: MetricChangeDetector,
}

impl Radar {
    pub fn new(
        backend: Arc<dyn StateBackend>,
        event_source: Arc<dyn EventSource>,
        metric_source: Arc<dyn MetricSource>,
        dispatcher: Arc<dyn Dispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            event_source,
            metric_source,
            dispatcher,
            clock,
            metrics: Vec::new(),
            thresholds: ThresholdConfig::default(),
            window_days: DEFAULT_WINDOW_DAYS,
            merger: EventMerger::new(DEFAULT_WINDOW_DAYS),
            evaluator: EventTriggerEvaluator::new(Duration::hours(DEFAULT_WARNING_HOURS)),
            detector: MetricChangeDetector,
        }
    }

    /// Set the tracked metrics and their rules
    pub fn with_metrics(mut self, metrics: Vec<MetricDefinition>, thresholds: ThresholdConfig) -> Self {
        self.metrics = metrics;
        self.thresholds = thresholds;
        self
    }

    pub fn with_window_days(mut self, days: i64) -> Self {
        self.window_days = days;
        self.merger = EventMerger::new(days);
        self
    }

    pub fn with_warning_hours(mut self, hours: i64) -> Self {
        self.evaluator = EventTriggerEvaluator::new(Duration::hours(hours));
        self
    }

    /// Execute one full run.
    ///
    /// # Errors
    ///
    /// Fails only when a store cannot be read (including corrupted content);
    /// in that case nothing is committed. Feed, dispatch and write failures
    /// are reported in the [`RunReport`] instead.
    pub async fn run_once(&self) -> Result<RunReport, RadarError> {
        let now = self.clock.now();
        tracing::info!(now = %now.to_rfc3339(), "Radar run started");

        // Read both stores up front so a corrupted one stops the run before
        // anything is sent or written.
        let calendar = EventStore::load(self.backend.as_ref())?;
        let snapshots = MetricSnapshotStore::load(self.backend.as_ref())?;

        let mut report = RunReport::default();
        self.run_calendar(calendar, now, &mut report).await;
        self.run_metrics(snapshots, now, &mut report).await;

        tracing::info!(
            tracked_events = report.calendar.tracked,
            metrics_evaluated = report.metrics.evaluated,
            metrics_skipped = report.metrics.skipped.len(),
            sent = report.sent.len(),
            failed = report.failed.len(),
            "Radar run finished"
        );
        Ok(report)
    }

    async fn run_calendar(
        &self,
        mut calendar: Versioned<EventStore>,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) {
        let mut changed = false;

        match self.event_source.fetch_events(self.window_days).await {
            Ok(batch) => {
                report.calendar.fetched = Some(batch.len());
                let store = std::mem::take(&mut calendar.value);
                let outcome = self.merger.merge(store, &batch, now);
                changed |= outcome.applied;
                report.calendar.inserted = outcome.inserted;
                report.calendar.updated = outcome.updated;
                report.calendar.evicted = outcome.evicted;
                calendar.value = outcome.store;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Calendar fetch failed, using stored window");
                report.calendar.fetch_error = Some(e.to_string());
            }
        }

        let intents = self.evaluator.evaluate(calendar.value.events_mut(), now);
        for intent in intents {
            let delivered = self.dispatch(&intent, report).await;
            if delivered {
                changed = true;
            } else if let Some((key, kind)) = intent.event_flag() {
                if let Some(event) = calendar.value.get_mut(key) {
                    event.set_flag(kind, false);
                }
            }
        }

        report.calendar.tracked = calendar.value.len();
        report.calendar.buckets = group_by_week(calendar.value.events(), now)
            .into_iter()
            .map(|(bucket, events)| (bucket, events.len()))
            .collect();
        for (bucket, count) in &report.calendar.buckets {
            tracing::info!(bucket = %bucket, events = *count, "Calendar bucket");
        }

        if changed {
            let result = EventStore::commit(&mut calendar, self.backend.as_ref(), now);
            report.calendar.commit = commit_status("calendar", result);
        }
    }

    async fn run_metrics(
        &self,
        mut snapshots: Versioned<MetricSnapshotStore>,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) {
        let mut changed = snapshots.value.prune(self.thresholds.names()) > 0;

        let fetches = self
            .metrics
            .iter()
            .map(|metric| self.metric_source.fetch_value(metric));
        let readings = futures::future::join_all(fetches).await;

        for (metric, reading) in self.metrics.iter().zip(readings) {
            let value = match reading {
                Ok(value) if value.is_finite() => value,
                Ok(value) => {
                    tracing::warn!(metric = %metric.name, value, "Ignoring non-finite reading");
                    report.metrics.skipped.push(metric.name.clone());
                    continue;
                }
                Err(e) => {
                    tracing::warn!(metric = %metric.name, error = %e, "Metric fetch failed");
                    report.metrics.skipped.push(metric.name.clone());
                    continue;
                }
            };

            let Some(rule) = self.thresholds.rule(&metric.name) else {
                tracing::warn!(metric = %metric.name, "No threshold rule, skipping");
                report.metrics.skipped.push(metric.name.clone());
                continue;
            };

            let (intent, snapshot) =
                self.detector
                    .evaluate(&metric.name, value, &snapshots.value, rule, now);
            report.metrics.evaluated += 1;

            // Keep the old baseline when the notice did not go out, so the
            // next run compares against it again.
            let advance = match intent {
                Some(intent) => self.dispatch(&intent, report).await,
                None => true,
            };
            if advance {
                snapshots.value.record(&metric.name, snapshot);
                changed = true;
            }
        }

        if changed {
            let result = MetricSnapshotStore::commit(&mut snapshots, self.backend.as_ref());
            report.metrics.commit = commit_status("metrics", result);
        }
    }

    /// Dispatch one intent, recording the outcome; true when acknowledged
    async fn dispatch(&self, intent: &NotificationIntent, report: &mut RunReport) -> bool {
        match self.dispatcher.dispatch(intent).await {
            Ok(ack) => {
                tracing::info!(
                    kind = intent.kind(),
                    subject = %intent.subject(),
                    delivered = ack.delivered,
                    "Notification sent"
                );
                report.sent.push(intent.clone());
                true
            }
            Err(e) => {
                tracing::warn!(
                    kind = intent.kind(),
                    subject = %intent.subject(),
                    error = %e,
                    "Notification failed, will retry next run"
                );
                report.failed.push(intent.clone());
                false
            }
        }
    }
}

fn commit_status(store: &str, result: Result<(), PersistenceError>) -> CommitStatus {
    match result {
        Ok(()) => CommitStatus::Committed,
        Err(e @ (PersistenceError::Conflict { .. } | PersistenceError::Locked(_))) => {
            tracing::warn!(store, error = %e, "Store changed underneath this run, dropping its writes");
            CommitStatus::Conflict
        }
        Err(e) => {
            tracing::error!(store, error = %e, "Failed to commit store");
            CommitStatus::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{ImpactLevel, RawEvent, StaticEventSource};
    use crate::clock::FixedClock;
    use crate::error::FetchError;
    use crate::metrics::{ComparisonMode, SourceSpec, StaticMetricSource, ThresholdRule};
    use crate::notify::RecordingDispatcher;
    use crate::store::{MemoryBackend, Revision, Stored, CALENDAR_KEY, METRICS_KEY};
    use chrono::TimeZone;
    use async_trait::async_trait;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 3, 0, 0).unwrap()
    }

    fn home_sales(actual: Option<&str>) -> RawEvent {
        RawEvent {
            country: "US".to_string(),
            title: "Existing Home Sales".to_string(),
            scheduled_time: t0() + Duration::hours(11),
            impact: ImpactLevel::High,
            forecast: Some("4.15M".to_string()),
            actual: actual.map(String::from),
            previous: Some("4.08M".to_string()),
        }
    }

    struct FailingSource;

    #[async_trait]
    impl EventSource for FailingSource {
        async fn fetch_events(&self, _window_days: i64) -> Result<Vec<RawEvent>, FetchError> {
            Err(FetchError::Network("connection reset".to_string()))
        }
    }

    struct Harness {
        backend: Arc<MemoryBackend>,
        clock: Arc<FixedClock>,
        dispatcher: Arc<RecordingDispatcher>,
        prices: Arc<StaticMetricSource>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                backend: Arc::new(MemoryBackend::new()),
                clock: Arc::new(FixedClock::new(t0())),
                dispatcher: Arc::new(RecordingDispatcher::new()),
                prices: Arc::new(StaticMetricSource::new()),
            }
        }

        fn radar(&self, source: Arc<dyn EventSource>) -> Radar {
            let metrics = vec![
                MetricDefinition {
                    name: "btc_price".to_string(),
                    source: SourceSpec::CoinGecko {
                        id: "bitcoin".to_string(),
                        vs_currency: "usd".to_string(),
                    },
                    mode: ComparisonMode::RelativePercent,
                    threshold: 0.5,
                },
                MetricDefinition {
                    name: "us10y_yield".to_string(),
                    source: SourceSpec::Fred {
                        series_id: "DGS10".to_string(),
                    },
                    mode: ComparisonMode::AbsoluteAnyChange,
                    threshold: 0.0,
                },
            ];
            let thresholds = ThresholdConfig::from_definitions(&metrics).unwrap();
            Radar::new(
                self.backend.clone(),
                source,
                self.prices.clone(),
                self.dispatcher.clone(),
                self.clock.clone(),
            )
            .with_metrics(metrics, thresholds)
        }

        fn with_events(&self, events: Vec<RawEvent>) -> Radar {
            self.radar(Arc::new(StaticEventSource::new(events)))
        }

        fn stored_events(&self) -> EventStore {
            EventStore::load(self.backend.as_ref()).unwrap().value
        }
    }

    #[tokio::test]
    async fn test_warning_sent_once_across_runs() {
        let h = Harness::new();
        let radar = h.with_events(vec![home_sales(None)]);

        let report = radar.run_once().await.unwrap();
        assert_eq!(report.sent.len(), 1);
        assert!(matches!(report.sent[0], NotificationIntent::Warning(_)));
        assert_eq!(report.calendar.commit, CommitStatus::Committed);
        assert!(h.stored_events().events()[0].warning_sent);

        h.clock.advance(Duration::hours(1));
        let report = radar.run_once().await.unwrap();
        assert!(report.sent.is_empty());
        assert_eq!(h.dispatcher.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_dispatch_leaves_flag_unset_then_retries() {
        let h = Harness::new();
        let radar = h.with_events(vec![home_sales(None)]);
        h.dispatcher.fail_on("Existing Home Sales");

        let report = radar.run_once().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(!h.stored_events().events()[0].warning_sent);

        h.dispatcher.recover();
        h.clock.advance(Duration::hours(1));
        let report = radar.run_once().await.unwrap();
        assert_eq!(report.sent.len(), 1);
        assert!(h.stored_events().events()[0].warning_sent);
    }

    #[tokio::test]
    async fn test_release_follows_warning_once() {
        let h = Harness::new();
        h.with_events(vec![home_sales(None)]).run_once().await.unwrap();

        h.clock.advance(Duration::hours(12));
        let released = h.with_events(vec![home_sales(Some("4.30M"))]);
        let report = released.run_once().await.unwrap();
        assert_eq!(report.sent.len(), 1);
        match &report.sent[0] {
            NotificationIntent::Release(r) => {
                assert_eq!(r.actual, "4.30M");
                assert!(r.deviation.is_some());
            }
            other => panic!("unexpected intent {:?}", other),
        }

        h.clock.advance(Duration::hours(1));
        assert!(released.run_once().await.unwrap().sent.is_empty());

        let stored = h.stored_events();
        assert!(stored.events()[0].warning_sent);
        assert!(stored.events()[0].release_sent);
    }

    #[tokio::test]
    async fn test_failed_scrape_keeps_window_and_still_warns() {
        let h = Harness::new();
        h.clock.set(t0() - Duration::hours(6));
        let report = h.with_events(vec![home_sales(None)]).run_once().await.unwrap();
        assert!(report.sent.is_empty());

        h.clock.set(t0());
        let report = h.radar(Arc::new(FailingSource)).run_once().await.unwrap();
        assert!(report.calendar.fetch_error.is_some());
        assert_eq!(report.calendar.tracked, 1);
        assert_eq!(report.sent.len(), 1);
        assert!(h.stored_events().events()[0].warning_sent);
    }

    #[tokio::test]
    async fn test_empty_scrape_writes_nothing() {
        let h = Harness::new();
        h.with_events(vec![home_sales(None)]).run_once().await.unwrap();
        let before = h.backend.get(CALENDAR_KEY);

        h.clock.advance(Duration::hours(1));
        let report = h.with_events(vec![]).run_once().await.unwrap();
        assert_eq!(report.calendar.commit, CommitStatus::Unchanged);
        assert_eq!(h.backend.get(CALENDAR_KEY), before);
    }

    #[tokio::test]
    async fn test_metric_baseline_then_threshold() {
        let h = Harness::new();
        let radar = h.with_events(vec![]);

        h.prices.set("btc_price", 100.0);
        h.prices.set("us10y_yield", 4.10);
        let report = radar.run_once().await.unwrap();
        assert!(report.sent.is_empty());
        assert_eq!(report.metrics.evaluated, 2);
        assert_eq!(report.metrics.commit, CommitStatus::Committed);

        h.prices.set("btc_price", 100.4);
        h.prices.set("us10y_yield", 4.11);
        let report = radar.run_once().await.unwrap();
        assert_eq!(report.sent.len(), 1);
        assert_eq!(report.sent[0].subject(), "us10y_yield");

        // Baseline is now 100.4, so 100.8 is below 0.5%
        h.prices.set("btc_price", 100.8);
        let report = radar.run_once().await.unwrap();
        assert!(report.sent.is_empty());
    }

    #[tokio::test]
    async fn test_metric_dispatch_failure_keeps_baseline() {
        let h = Harness::new();
        let radar = h.with_events(vec![]);
        h.prices.set("btc_price", 100.0);
        radar.run_once().await.unwrap();

        h.dispatcher.fail_on("btc_price");
        h.prices.set("btc_price", 110.0);
        let report = radar.run_once().await.unwrap();
        assert_eq!(report.failed.len(), 1);

        let stored = MetricSnapshotStore::load(h.backend.as_ref()).unwrap().value;
        assert_eq!(stored.get("btc_price").map(|s| s.value), Some(100.0));

        h.dispatcher.recover();
        let report = radar.run_once().await.unwrap();
        assert_eq!(report.sent.len(), 1);
    }

    #[tokio::test]
    async fn test_metric_fetch_failure_is_isolated() {
        let h = Harness::new();
        let radar = h.with_events(vec![]);
        h.prices.set("btc_price", 100.0);

        let report = radar.run_once().await.unwrap();
        assert_eq!(report.metrics.skipped, vec!["us10y_yield".to_string()]);
        assert_eq!(report.metrics.evaluated, 1);

        let stored = MetricSnapshotStore::load(h.backend.as_ref()).unwrap().value;
        assert!(stored.get("btc_price").is_some());
        assert!(stored.get("us10y_yield").is_none());
    }

    #[tokio::test]
    async fn test_corrupted_store_halts_without_side_effects() {
        let h = Harness::new();
        h.backend
            .compare_and_swap(METRICS_KEY, None, b"{\"btc_price\": oops")
            .unwrap();
        h.prices.set("btc_price", 100.0);

        let err = h.with_events(vec![home_sales(None)]).run_once().await.unwrap_err();
        assert!(matches!(err, RadarError::Persistence(ref e) if e.is_fatal()));
        assert!(h.dispatcher.sent().is_empty());
        assert!(h.backend.get(CALENDAR_KEY).is_none());
    }

    /// Backend where another writer lands between this run's read and write
    struct RacingBackend {
        inner: MemoryBackend,
    }

    impl StateBackend for RacingBackend {
        fn read(&self, key: &str) -> Result<Option<Stored>, PersistenceError> {
            self.inner.read(key)
        }

        fn compare_and_swap(
            &self,
            key: &str,
            expected: Option<Revision>,
            data: &[u8],
        ) -> Result<Revision, PersistenceError> {
            if key == CALENDAR_KEY {
                let current = self.inner.read(key)?.map(|s| s.revision);
                self.inner
                    .compare_and_swap(key, current, b"{\"events\": []}")?;
            }
            self.inner.compare_and_swap(key, expected, data)
        }
    }

    #[tokio::test]
    async fn test_concurrent_writer_causes_conflict() {
        let h = Harness::new();
        let backend = Arc::new(RacingBackend {
            inner: MemoryBackend::new(),
        });
        let radar = Radar::new(
            backend.clone(),
            Arc::new(StaticEventSource::new(vec![home_sales(None)])),
            h.prices.clone(),
            h.dispatcher.clone(),
            h.clock.clone(),
        );

        let report = radar.run_once().await.unwrap();
        assert_eq!(report.calendar.commit, CommitStatus::Conflict);
        assert_eq!(report.sent.len(), 1);

        let stored = EventStore::load(backend.as_ref()).unwrap().value;
        assert!(stored.is_empty());
    }

    /// Backend whose calendar lock is held by another run
    struct LockedBackend {
        inner: MemoryBackend,
    }

    impl StateBackend for LockedBackend {
        fn read(&self, key: &str) -> Result<Option<Stored>, PersistenceError> {
            self.inner.read(key)
        }

        fn compare_and_swap(
            &self,
            key: &str,
            expected: Option<Revision>,
            data: &[u8],
        ) -> Result<Revision, PersistenceError> {
            if key == CALENDAR_KEY {
                return Err(PersistenceError::Locked(key.to_string()));
            }
            self.inner.compare_and_swap(key, expected, data)
        }
    }

    #[tokio::test]
    async fn test_locked_store_drops_only_its_writes() {
        let h = Harness::new();
        let backend = Arc::new(LockedBackend {
            inner: MemoryBackend::new(),
        });
        let radar = Radar::new(
            backend.clone(),
            Arc::new(StaticEventSource::new(vec![home_sales(None)])),
            h.prices.clone(),
            h.dispatcher.clone(),
            h.clock.clone(),
        )
        .with_metrics(
            vec![MetricDefinition {
                name: "btc_price".to_string(),
                source: SourceSpec::CoinGecko {
                    id: "bitcoin".to_string(),
                    vs_currency: "usd".to_string(),
                },
                mode: ComparisonMode::RelativePercent,
                threshold: 0.5,
            }],
            ThresholdConfig::from_rules([ThresholdRule::relative_percent("btc_price", 0.5)]).unwrap(),
        );
        h.prices.set("btc_price", 100.0);

        let report = radar.run_once().await.unwrap();
        assert_eq!(report.calendar.commit, CommitStatus::Conflict);
        assert_eq!(report.metrics.commit, CommitStatus::Committed);
        assert!(backend.inner.get(CALENDAR_KEY).is_none());
        assert!(backend.inner.get(METRICS_KEY).is_some());
    }
}
