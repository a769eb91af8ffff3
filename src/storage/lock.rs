//! Update locks
//!
//! At most one update runs against a database at a time. A second attempt
//! fails immediately with [`StorageError::Locked`] instead of waiting.
//!
//! The registry is the source of truth; the `lock.json` file next to the
//! database mirrors its state for external observers. The lock file is only
//! written into an existing directory, so a lock taken or released around a
//! deleted database never brings its directory back.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::fs::{read_json_or_default, write_json};

/// Contents of `lock.json`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LockState {
    pub is_locked: bool,
}

impl LockState {
    pub fn load(path: &Path) -> StorageResult<Self> {
        read_json_or_default(path)
    }

    /// Write the state; fails with `NotFound` if the directory is gone
    pub fn save(&self, path: &Path) -> StorageResult<()> {
        if !parent_exists(path) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("lock directory of '{}' does not exist", path.display()),
            )
            .into());
        }
        write_json(path, self)
    }
}

fn parent_exists(path: &Path) -> bool {
    path.parent().map_or(true, |p| p.as_os_str().is_empty() || p.is_dir())
}

/// Set of databases with an update in progress
#[derive(Debug, Default)]
pub struct LockRegistry {
    held: Mutex<HashSet<String>>,
}

impl LockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the update lock for `database_id` or fail without waiting
    pub fn try_acquire(
        self: &Arc<Self>,
        database_id: &str,
        lock_file: impl Into<PathBuf>,
    ) -> StorageResult<UpdateGuard> {
        let key = database_id.to_lowercase();
        if !self.held().insert(key.clone()) {
            return Err(StorageError::Locked(database_id.to_string()));
        }

        let lock_file = lock_file.into();
        if let Err(e) = (LockState { is_locked: true }).save(&lock_file) {
            self.held().remove(&key);
            return Err(e);
        }

        tracing::debug!(database = %database_id, "Acquired update lock");
        Ok(UpdateGuard {
            registry: Arc::clone(self),
            key,
            lock_file,
        })
    }

    pub fn is_locked(&self, database_id: &str) -> bool {
        self.held().contains(&database_id.to_lowercase())
    }
}

/// Held update lock; released on drop
#[derive(Debug)]
pub struct UpdateGuard {
    registry: Arc<LockRegistry>,
    key: String,
    lock_file: PathBuf,
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        if !parent_exists(&self.lock_file) {
            tracing::debug!(database = %self.key, "Lock directory removed while held");
        } else if let Err(e) = (LockState { is_locked: false }).save(&self.lock_file) {
            tracing::warn!(database = %self.key, error = %e, "Failed to clear lock file");
        }
        self.registry.held().remove(&self.key);
        tracing::debug!(database = %self.key, "Released update lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_acquire_fails_fast() {
        let dir = tempdir().unwrap();
        let registry = LockRegistry::new();
        let lock_file = dir.path().join("lock.json");

        let guard = registry.try_acquire("db", &lock_file).unwrap();
        assert!(registry.is_locked("DB"));
        assert!(LockState::load(&lock_file).unwrap().is_locked);

        let second = registry.try_acquire("db", &lock_file);
        assert!(matches!(second, Err(StorageError::Locked(_))));

        drop(guard);
        assert!(!registry.is_locked("db"));
        assert!(!LockState::load(&lock_file).unwrap().is_locked);
        assert!(registry.try_acquire("db", &lock_file).is_ok());
    }

    #[test]
    fn test_released_on_panic() {
        let dir = tempdir().unwrap();
        let registry = LockRegistry::new();
        let lock_file = dir.path().join("lock.json");

        let r = Arc::clone(&registry);
        let lf = lock_file.clone();
        let result = std::thread::spawn(move || {
            let _guard = r.try_acquire("db", &lf).unwrap();
            panic!("update failed");
        })
        .join();

        assert!(result.is_err());
        assert!(!registry.is_locked("db"));
        assert!(!LockState::load(&lock_file).unwrap().is_locked);
    }

    #[test]
    fn test_lock_file_never_recreates_directory() {
        let dir = tempdir().unwrap();
        let registry = LockRegistry::new();
        let db_dir = dir.path().join("db");
        std::fs::create_dir_all(&db_dir).unwrap();

        let guard = registry.try_acquire("db", db_dir.join("lock.json")).unwrap();
        std::fs::remove_dir_all(&db_dir).unwrap();
        drop(guard);
        assert!(!db_dir.exists());
        assert!(!registry.is_locked("db"));

        let again = registry.try_acquire("db", db_dir.join("lock.json"));
        assert!(matches!(again, Err(StorageError::Io(_))));
        assert!(!db_dir.exists());
        assert!(!registry.is_locked("db"));
    }

    #[test]
    fn test_independent_databases() {
        let dir = tempdir().unwrap();
        let registry = LockRegistry::new();
        let _a = registry.try_acquire("a", dir.path().join("a.json")).unwrap();
        assert!(registry.try_acquire("b", dir.path().join("b.json")).is_ok());
    }
}
