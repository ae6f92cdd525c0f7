//! Reconcile scraped events with the stored rolling window

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use super::event::{Event, EventKey, RawEvent};
use crate::store::EventStore;

/// Default span of the rolling window, both behind and ahead of now
pub const DEFAULT_WINDOW_DAYS: i64 = 28;

/// Result of merging one scrape into the window
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Updated window, sorted by scheduled time
    pub store: EventStore,
    pub inserted: usize,
    pub updated: usize,
    pub evicted: usize,
    /// False when the scrape was empty and the window was left as is
    pub applied: bool,
}

impl MergeOutcome {
    pub fn events(&self) -> &[Event] {
        self.store.events()
    }
}

/// Merges scraped records into the stored window.
///
/// Matching is by [`EventKey`]. Matched events get their figures refreshed
/// while `warning_sent` and `release_sent` are carried over untouched, which
/// is what keeps a notification from being sent twice across runs.
#[derive(Debug, Clone)]
pub struct EventMerger {
    retain_past: Duration,
    horizon: Duration,
}

impl Default for EventMerger {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_DAYS)
    }
}

impl EventMerger {
    pub fn new(window_days: i64) -> Self {
        Self {
            retain_past: Duration::days(window_days),
            horizon: Duration::days(window_days),
        }
    }

    /// Whether an event scheduled at `scheduled` belongs in the window at `now`
    pub fn in_window(&self, scheduled: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        scheduled >= now - self.retain_past && scheduled <= now + self.horizon
    }

    pub fn merge(&self, existing: EventStore, scraped: &[RawEvent], now: DateTime<Utc>) -> MergeOutcome {
        // An empty batch means the source had nothing for us, not that the
        // calendar was cleared.
        if scraped.is_empty() {
            tracing::warn!(
                stored = existing.len(),
                "Empty calendar batch, keeping stored window unchanged"
            );
            return MergeOutcome {
                store: existing,
                inserted: 0,
                updated: 0,
                evicted: 0,
                applied: false,
            };
        }

        let mut store = existing;
        let mut index: HashMap<EventKey, usize> = store
            .events()
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key(), i))
            .collect();

        let mut inserted = 0;
        let mut updated = 0;

        for raw in scraped {
            let key = raw.key();
            match index.get(&key) {
                Some(&pos) => {
                    if let Some(event) = store.events_mut().get_mut(pos) {
                        event.update_from(raw);
                        updated += 1;
                    }
                }
                None => {
                    tracing::debug!(event_key = %key, "New calendar event");
                    index.insert(key, store.len());
                    store.push(Event::from_raw(raw.clone()));
                    inserted += 1;
                }
            }
        }

        let evicted = store.retain(|e| self.in_window(e.scheduled_time, now));
        store.sort();

        tracing::info!(
            scraped = scraped.len(),
            inserted,
            updated,
            evicted,
            tracked = store.len(),
            "Merged calendar batch"
        );

        MergeOutcome {
            store,
            inserted,
            updated,
            evicted,
            applied: true,
        }
    }
}
