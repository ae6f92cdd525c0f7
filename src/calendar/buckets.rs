//! Week buckets for display

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use super::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WeekBucket {
    ThisWeek,
    NextWeek,
    Week3,
    Week4,
}

impl fmt::Display for WeekBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WeekBucket::ThisWeek => "this week",
            WeekBucket::NextWeek => "next week",
            WeekBucket::Week3 => "week 3",
            WeekBucket::Week4 => "week 4",
        };
        f.write_str(s)
    }
}

/// Bucket of an event, counting whole 7-day spans from the start of today (UTC).
///
/// Events before today and beyond the fourth week have no bucket.
pub fn bucket_for(scheduled: DateTime<Utc>, now: DateTime<Utc>) -> Option<WeekBucket> {
    let today = now.date_naive();
    let days = (scheduled.date_naive() - today).num_days();
    match days {
        0..=6 => Some(WeekBucket::ThisWeek),
        7..=13 => Some(WeekBucket::NextWeek),
        14..=20 => Some(WeekBucket::Week3),
        21..=27 => Some(WeekBucket::Week4),
        _ => None,
    }
}

/// Group events by bucket, keeping their order within each bucket
pub fn group_by_week(events: &[Event], now: DateTime<Utc>) -> BTreeMap<WeekBucket, Vec<&Event>> {
    let mut groups: BTreeMap<WeekBucket, Vec<&Event>> = BTreeMap::new();
    for event in events {
        if let Some(bucket) = bucket_for(event.scheduled_time, now) {
            groups.entry(bucket).or_default().push(event);
        }
    }
    groups
}
