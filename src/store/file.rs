//! JSON file backend with lock-file guarded compare-and-swap

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use super::{PersistenceError, Revision, StateBackend, Stored};

/// Locks older than this are assumed to belong to a crashed run
const DEFAULT_STALE_LOCK: Duration = Duration::from_secs(600);

/// Stores each key as `<data_dir>/<key>.json`
#[derive(Debug, Clone)]
pub struct FileBackend {
    data_dir: PathBuf,
    stale_lock_after: Duration,
}

impl FileBackend {
    /// Create a backend rooted at `data_dir`, creating it if needed
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self, PersistenceError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        Ok(Self {
            data_dir,
            stale_lock_after: DEFAULT_STALE_LOCK,
        })
    }

    pub fn with_stale_lock_after(mut self, after: Duration) -> Self {
        self.stale_lock_after = after;
        self
    }

    /// Get the file path for a key
    pub fn key_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", key))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.lock", key))
    }

    fn tmp_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json.tmp", key))
    }

    fn read_path(path: &Path) -> Result<Option<Vec<u8>>, PersistenceError> {
        match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Take the single-writer lock for `key`, breaking it once if stale
    fn lock(&self, key: &str) -> Result<LockGuard, PersistenceError> {
        let path = self.lock_path(key);

        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(LockGuard { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt == 0 => {
                    if !self.break_stale_lock(&path)? {
                        return Err(PersistenceError::Locked(key.to_string()));
                    }
                    tracing::warn!(key = %key, "Broke stale store lock");
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    return Err(PersistenceError::Locked(key.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PersistenceError::Locked(key.to_string()))
    }

    /// Remove the lock at `path` if it is stale; true when it is gone.
    ///
    /// The lock is first renamed to a name unique to this writer, so of two
    /// writers racing to break it only one can claim it. A claimed lock that
    /// turns out to be fresh is linked back in place.
    fn break_stale_lock(&self, path: &Path) -> Result<bool, PersistenceError> {
        static CLAIMS: AtomicU64 = AtomicU64::new(0);
        let claimed = path.with_extension(format!(
            "lock.{}.{}",
            std::process::id(),
            CLAIMS.fetch_add(1, Ordering::Relaxed)
        ));

        match fs::rename(path, &claimed) {
            Ok(()) => {}
            // Someone else broke or released it; retry the create
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }

        if self.is_stale(&claimed) {
            fs::remove_file(&claimed)?;
            return Ok(true);
        }

        // hard_link fails if a new lock appeared meanwhile, which keeps that one
        let _ = fs::hard_link(&claimed, path);
        fs::remove_file(&claimed)?;
        Ok(false)
    }

    fn is_stale(&self, lock: &Path) -> bool {
        fs::metadata(lock)
            .and_then(|m| m.modified())
            .ok()
            .map(|modified| SystemTime::now().duration_since(modified).unwrap_or_default())
            .map(|age| age >= self.stale_lock_after)
            .unwrap_or(false)
    }
}

struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl StateBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<Stored>, PersistenceError> {
        Ok(Self::read_path(&self.key_path(key))?.map(|data| Stored {
            revision: Revision::of(&data),
            data,
        }))
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Revision>,
        data: &[u8],
    ) -> Result<Revision, PersistenceError> {
        let _guard = self.lock(key)?;

        let path = self.key_path(key);
        let current = Self::read_path(&path)?.map(|d| Revision::of(&d));
        if current != expected {
            return Err(PersistenceError::conflict(key, expected, current));
        }

        // Write aside and rename so readers never observe a partial file
        let tmp = self.tmp_path(key);
        {
            let mut file: File = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        Ok(Revision::of(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_write_read() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path()).unwrap();

        assert!(backend.read("calendar_data").unwrap().is_none());

        let revision = backend
            .compare_and_swap("calendar_data", None, b"{\"events\":[]}")
            .unwrap();
        let stored = backend.read("calendar_data").unwrap().unwrap();
        assert_eq!(stored.data, b"{\"events\":[]}".to_vec());
        assert_eq!(stored.revision, revision);
        assert!(backend.key_path("calendar_data").exists());
        assert!(!backend.lock_path("calendar_data").exists());
    }

    #[test]
    fn test_file_conflict_on_stale_revision() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path()).unwrap();

        let r1 = backend.compare_and_swap("metrics_data", None, b"{}").unwrap();
        backend
            .compare_and_swap("metrics_data", Some(r1), b"{\"a\":1}")
            .unwrap();

        let err = backend
            .compare_and_swap("metrics_data", Some(r1), b"{\"b\":2}")
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Conflict { .. }));
        let stored = backend.read("metrics_data").unwrap().unwrap();
        assert_eq!(stored.data, b"{\"a\":1}".to_vec());
    }

    #[test]
    fn test_held_lock_blocks_writer() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path()).unwrap();

        fs::write(backend.lock_path("calendar_data"), b"4242").unwrap();
        let err = backend
            .compare_and_swap("calendar_data", None, b"{}")
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Locked(_)));
    }

    fn lock_leftovers(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(".lock"))
            .collect()
    }

    #[test]
    fn test_fresh_lock_survives_break_attempt() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path()).unwrap();
        let lock = backend.lock_path("calendar_data");
        fs::write(&lock, b"4242").unwrap();

        assert!(!backend.break_stale_lock(&lock).unwrap());
        assert_eq!(fs::read(&lock).unwrap(), b"4242".to_vec());
        assert_eq!(lock_leftovers(temp_dir.path()), vec!["calendar_data.lock".to_string()]);
    }

    #[test]
    fn test_stale_lock_break_is_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path())
            .unwrap()
            .with_stale_lock_after(Duration::ZERO);
        let lock = backend.lock_path("calendar_data");
        fs::write(&lock, b"4242").unwrap();

        assert!(backend.break_stale_lock(&lock).unwrap());
        assert!(!lock.exists());
        // A second breaker finds nothing to claim and goes on to create
        assert!(backend.break_stale_lock(&lock).unwrap());
        assert!(lock_leftovers(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_stale_lock_is_broken() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path())
            .unwrap()
            .with_stale_lock_after(Duration::ZERO);

        fs::write(backend.lock_path("calendar_data"), b"4242").unwrap();
        backend
            .compare_and_swap("calendar_data", None, b"{}")
            .unwrap();
        assert!(!backend.lock_path("calendar_data").exists());
    }
}
