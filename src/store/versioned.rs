//! Read-modify-write helper over a [`StateBackend`]

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{PersistenceError, Revision, StateBackend};

/// A value loaded from a backend, remembering the revision it came from
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    pub revision: Option<Revision>,
}

impl<T> Versioned<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            value: f(self.value),
            revision: self.revision,
        }
    }

    /// Serialize `doc` and swap it in, advancing the remembered revision
    pub fn commit_with<D: Serialize>(
        &mut self,
        backend: &dyn StateBackend,
        key: &str,
        doc: &D,
    ) -> Result<(), PersistenceError> {
        let data = serde_json::to_vec_pretty(doc)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        let revision = backend.compare_and_swap(key, self.revision, &data)?;
        tracing::debug!(key = %key, revision = %revision, bytes = data.len(), "Committed store");
        self.revision = Some(revision);
        Ok(())
    }
}

impl<T: DeserializeOwned + Default> Versioned<T> {
    /// Load `key`, or the default value when it has never been written.
    ///
    /// Content that does not parse is reported as corruption rather than
    /// replaced, so a broken file is never overwritten with an empty one.
    pub fn load(backend: &dyn StateBackend, key: &str) -> Result<Self, PersistenceError> {
        match backend.read(key)? {
            None => Ok(Self {
                value: T::default(),
                revision: None,
            }),
            Some(stored) => {
                let value = serde_json::from_slice(&stored.data).map_err(|e| {
                    PersistenceError::Corrupted {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Self {
                    value,
                    revision: Some(stored.revision),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use std::collections::BTreeMap;

    #[test]
    fn test_corrupted_document_is_fatal() {
        let backend = MemoryBackend::new();
        backend.compare_and_swap("doc", None, b"{not json").unwrap();

        let err = Versioned::<BTreeMap<String, f64>>::load(&backend, "doc").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_commit_advances_revision() {
        let backend = MemoryBackend::new();
        let mut doc = Versioned::<BTreeMap<String, f64>>::load(&backend, "doc").unwrap();
        assert!(doc.revision.is_none());

        doc.value.insert("a".to_string(), 1.0);
        let value = doc.value.clone();
        doc.commit_with(&backend, "doc", &value).unwrap();
        let first = doc.revision;
        assert!(first.is_some());

        doc.value.insert("b".to_string(), 2.0);
        let value = doc.value.clone();
        doc.commit_with(&backend, "doc", &value).unwrap();
        assert_ne!(doc.revision, first);
    }
}
