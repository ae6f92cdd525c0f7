//! In-process backend, used by tests and dry runs

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{PersistenceError, Revision, StateBackend, Stored};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    docs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw document bytes, for inspection
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.docs.read().get(key).cloned()
    }
}

impl StateBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<Stored>, PersistenceError> {
        Ok(self.docs.read().get(key).map(|data| Stored {
            revision: Revision::of(data),
            data: data.clone(),
        }))
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Revision>,
        data: &[u8],
    ) -> Result<Revision, PersistenceError> {
        let mut docs = self.docs.write();
        let current = docs.get(key).map(|d| Revision::of(d));
        if current != expected {
            return Err(PersistenceError::conflict(key, expected, current));
        }
        docs.insert(key.to_string(), data.to_vec());
        Ok(Revision::of(data))
    }
}
