//! Cross-run state
//!
//! The calendar window and the metric snapshots are the only memory a run
//! inherits from the previous one. Both go through a [`StateBackend`] that
//! offers read plus compare-and-swap, so two overlapping runs cannot silently
//! overwrite each other's flag updates.

pub mod event_store;
pub mod file;
pub mod memory;
pub mod snapshot_store;
pub mod versioned;

pub use event_store::{CalendarDocument, EventStore, CALENDAR_KEY};
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use snapshot_store::{MetricSnapshot, MetricSnapshotStore, METRICS_KEY};
pub use versioned::Versioned;

use std::fmt;

/// Content fingerprint of a stored document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Revision(u64);

impl Revision {
    pub fn of(data: &[u8]) -> Self {
        Self(fxhash::hash64(data))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Bytes read from a backend, tagged with their revision
#[derive(Debug, Clone)]
pub struct Stored {
    pub data: Vec<u8>,
    pub revision: Revision,
}

/// Storage for the persisted documents.
///
/// `compare_and_swap` must be atomic with respect to other writers of the
/// same key: it only writes when the current revision equals `expected`
/// (`None` meaning the key must not exist yet).
pub trait StateBackend: Send + Sync {
    /// Read the current document, if any
    fn read(&self, key: &str) -> Result<Option<Stored>, PersistenceError>;

    /// Replace the document if it is still at `expected`
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Revision>,
        data: &[u8],
    ) -> Result<Revision, PersistenceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted data in {key}: {reason}")]
    Corrupted { key: String, reason: String },

    #[error("Concurrent write detected on {key}: expected {expected}, found {found}")]
    Conflict {
        key: String,
        expected: String,
        found: String,
    },

    #[error("Store {0} is locked by another run")]
    Locked(String),
}

impl PersistenceError {
    /// Whether the failure leaves the store unusable for this and later runs
    pub fn is_fatal(&self) -> bool {
        matches!(self, PersistenceError::Corrupted { .. })
    }

    pub(crate) fn conflict(key: &str, expected: Option<Revision>, found: Option<Revision>) -> Self {
        let show = |r: Option<Revision>| r.map_or_else(|| "none".to_string(), |r| r.to_string());
        PersistenceError::Conflict {
            key: key.to_string(),
            expected: show(expected),
            found: show(found),
        }
    }
}
