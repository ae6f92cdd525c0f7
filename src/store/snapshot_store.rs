//! Last observed value per metric

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::versioned::Versioned;
use super::{PersistenceError, StateBackend};

/// Backend key of the metrics data file
pub const METRICS_KEY: &str = "metrics_data";

/// Baseline value of one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub value: f64,
    #[serde(rename = "timestamp")]
    pub observed_at: DateTime<Utc>,
}

/// Exactly one snapshot per metric name; writes overwrite
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSnapshotStore {
    snapshots: BTreeMap<String, MetricSnapshot>,
}

impl MetricSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&MetricSnapshot> {
        self.snapshots.get(name)
    }

    /// Overwrite the snapshot for `name`, returning the one it replaced
    pub fn record(&mut self, name: &str, snapshot: MetricSnapshot) -> Option<MetricSnapshot> {
        self.snapshots.insert(name.to_string(), snapshot)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Drop snapshots of metrics that are no longer configured
    pub fn prune<'a>(&mut self, configured: impl IntoIterator<Item = &'a str>) -> usize {
        let keep: Vec<&str> = configured.into_iter().collect();
        let before = self.snapshots.len();
        self.snapshots.retain(|name, _| keep.contains(&name.as_str()));
        before - self.snapshots.len()
    }

    pub fn load(backend: &dyn StateBackend) -> Result<Versioned<Self>, PersistenceError> {
        Versioned::load(backend, METRICS_KEY)
    }

    pub fn commit(
        versioned: &mut Versioned<Self>,
        backend: &dyn StateBackend,
    ) -> Result<(), PersistenceError> {
        let doc = versioned.value.clone();
        versioned.commit_with(backend, METRICS_KEY, &doc)
    }
}
