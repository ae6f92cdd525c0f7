//! Persisted calendar window

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::versioned::Versioned;
use super::{PersistenceError, StateBackend};
use crate::calendar::{Event, EventKey};

/// Backend key of the calendar data file
pub const CALENDAR_KEY: &str = "calendar_data";

/// On-disk shape of the calendar data file, also read by the frontend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarDocument {
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub events: Vec<Event>,
}

/// All tracked events, kept sorted by scheduled time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from arbitrary records; later duplicates of a key win
    pub fn from_events(events: impl IntoIterator<Item = Event>) -> Self {
        let mut store = Self::new();
        for event in events {
            store.upsert(event);
        }
        store.sort();
        store
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut [Event] {
        &mut self.events
    }

    pub fn get_mut(&mut self, key: &EventKey) -> Option<&mut Event> {
        self.events.iter_mut().find(|e| &e.key() == key)
    }

    pub(crate) fn upsert(&mut self, event: Event) {
        let key = event.key();
        match self.get_mut(&key) {
            Some(existing) => *existing = event,
            None => self.events.push(event),
        }
    }

    pub(crate) fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub(crate) fn retain(&mut self, keep: impl FnMut(&Event) -> bool) -> usize {
        let before = self.events.len();
        self.events.retain(keep);
        before - self.events.len()
    }

    pub(crate) fn sort(&mut self) {
        self.events
            .sort_by(|a, b| a.scheduled_time.cmp(&b.scheduled_time).then_with(|| a.id.cmp(&b.id)));
    }

    pub fn to_document(&self, updated_at: DateTime<Utc>) -> CalendarDocument {
        CalendarDocument {
            updated_at: Some(updated_at),
            events: self.events.clone(),
        }
    }

    /// Load the calendar window together with the revision it was read at
    pub fn load(backend: &dyn StateBackend) -> Result<Versioned<EventStore>, PersistenceError> {
        let doc: Versioned<CalendarDocument> = Versioned::load(backend, CALENDAR_KEY)?;
        Ok(doc.map(|d| EventStore::from_events(d.events)))
    }

    /// Write the window back, failing with a conflict if another run committed first
    pub fn commit(
        versioned: &mut Versioned<EventStore>,
        backend: &dyn StateBackend,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let doc = versioned.value.to_document(now);
        versioned.commit_with(backend, CALENDAR_KEY, &doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{ImpactLevel, RawEvent};
    use crate::store::MemoryBackend;
    use chrono::{Duration, TimeZone};

    fn event(title: &str, offset_hours: i64) -> Event {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        Event::from_raw(RawEvent {
            country: "US".to_string(),
            title: title.to_string(),
            scheduled_time: base + Duration::hours(offset_hours),
            impact: ImpactLevel::High,
            forecast: None,
            actual: None,
            previous: None,
        })
    }

    #[test]
    fn test_from_events_dedupes_and_sorts() {
        let mut flagged = event("CPI", 5);
        flagged.warning_sent = true;
        let store = EventStore::from_events(vec![event("CPI", 5), event("GDP", 1), flagged]);

        assert_eq!(store.len(), 2);
        assert_eq!(store.events()[0].title, "GDP");
        assert!(store.events()[1].warning_sent);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let backend = MemoryBackend::new();
        let loaded = EventStore::load(&backend).unwrap();
        assert!(loaded.value.is_empty());
        assert!(loaded.revision.is_none());
    }

    #[test]
    fn test_commit_then_load_round_trip_keeps_flags() {
        let backend = MemoryBackend::new();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();

        let mut loaded = EventStore::load(&backend).unwrap();
        let mut cpi = event("CPI", 5);
        cpi.release_sent = true;
        cpi.actual = Some("3.1%".to_string());
        loaded.value = EventStore::from_events(vec![cpi.clone()]);
        EventStore::commit(&mut loaded, &backend, now).unwrap();

        let reloaded = EventStore::load(&backend).unwrap();
        assert_eq!(reloaded.value.events(), &[cpi]);
        assert_eq!(reloaded.revision, loaded.revision);
    }

    #[test]
    fn test_concurrent_commit_conflicts() {
        let backend = MemoryBackend::new();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();

        let mut first = EventStore::load(&backend).unwrap();
        let mut second = EventStore::load(&backend).unwrap();

        first.value = EventStore::from_events(vec![event("CPI", 5)]);
        EventStore::commit(&mut first, &backend, now).unwrap();

        second.value = EventStore::from_events(vec![event("GDP", 5)]);
        let err = EventStore::commit(&mut second, &backend, now).unwrap_err();
        assert!(matches!(err, PersistenceError::Conflict { .. }));
    }
}
