//! Per-dataset advisory locks.
//!
//! Create and drop take the lock exclusively and fail fast when it is
//! held; query and delete-by-document take it shared and wait. Within a
//! process the lock is a `tokio` read/write lock per dataset. With a lock
//! directory configured, an `fs2` file lock is taken as well so separate
//! processes sharing a workspace exclude each other too.

use crate::cancel::Cancellation;
use crate::naming::validate_dataset_id;
use docindex_core::{AppError, AppResult};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Poll interval while waiting for a shared file lock.
const FILE_LOCK_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
enum MemoryGuard {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct DatasetGuard {
    memory: MemoryGuard,
    // Closing the file releases the fs2 lock.
    _file: Option<File>,
}

impl DatasetGuard {
    pub fn is_exclusive(&self) -> bool {
        matches!(self.memory, MemoryGuard::Exclusive(_))
    }
}

/// Lock table shared by every index handle of a manager.
#[derive(Debug, Default)]
pub struct DatasetLocks {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
    lock_dir: Option<PathBuf>,
}

impl DatasetLocks {
    /// In-process locking only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also lock `<dir>/<dataset_id>.lock` for cross-process exclusion.
    pub fn with_lock_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            lock_dir: Some(dir.into()),
        }
    }

    fn entry(&self, dataset_id: &str) -> Arc<RwLock<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(dataset_id.to_string()).or_default())
    }

    fn open_lock_file(&self, dataset_id: &str) -> AppResult<Option<File>> {
        let Some(dir) = &self.lock_dir else {
            return Ok(None);
        };
        validate_dataset_id(dataset_id)?;
        fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(format!("{}.lock", dataset_id)))?;
        Ok(Some(file))
    }

    /// Take the writer lock or fail with `LockContention`.
    pub fn try_exclusive(&self, dataset_id: &str) -> AppResult<DatasetGuard> {
        let contention = || AppError::LockContention {
            dataset_id: dataset_id.to_string(),
        };

        let memory = self
            .entry(dataset_id)
            .try_write_owned()
            .map_err(|_| contention())?;

        let file = match self.open_lock_file(dataset_id)? {
            Some(file) => {
                file.try_lock_exclusive().map_err(|_| contention())?;
                Some(file)
            }
            None => None,
        };

        tracing::debug!("Acquired exclusive lock on dataset '{}'", dataset_id);
        Ok(DatasetGuard {
            memory: MemoryGuard::Exclusive(memory),
            _file: file,
        })
    }

    /// Wait for a reader lock, giving up when `cancel` fires.
    pub async fn shared(&self, dataset_id: &str, cancel: &Cancellation) -> AppResult<DatasetGuard> {
        let lock = self.entry(dataset_id);
        let memory = cancel
            .run("waiting for dataset lock", async { Ok(lock.read_owned().await) })
            .await?;

        let file = match self.open_lock_file(dataset_id)? {
            Some(file) => {
                while file.try_lock_shared().is_err() {
                    cancel.check("waiting for dataset lock")?;
                    tokio::time::sleep(FILE_LOCK_POLL).await;
                }
                Some(file)
            }
            None => None,
        };

        Ok(DatasetGuard {
            memory: MemoryGuard::Shared(memory),
            _file: file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_exclusive_excludes_exclusive() {
        let locks = DatasetLocks::new();
        let guard = locks.try_exclusive("ds-1").unwrap();
        assert!(guard.is_exclusive());
        assert!(matches!(
            locks.try_exclusive("ds-1"),
            Err(AppError::LockContention { .. })
        ));
        assert!(locks.try_exclusive("ds-2").is_ok());

        drop(guard);
        assert!(locks.try_exclusive("ds-1").is_ok());
    }

    #[tokio::test]
    async fn test_shared_readers_coexist_and_block_writers() {
        let locks = DatasetLocks::new();
        let a = locks.shared("ds", &Cancellation::none()).await.unwrap();
        let b = locks.shared("ds", &Cancellation::none()).await.unwrap();
        assert!(!a.is_exclusive());
        assert!(locks.try_exclusive("ds").is_err());
        drop((a, b));
        assert!(locks.try_exclusive("ds").is_ok());
    }

    #[tokio::test]
    async fn test_shared_wait_is_cancellable() {
        let locks = DatasetLocks::new();
        let _writer = locks.try_exclusive("ds").unwrap();
        let result = locks
            .shared("ds", &Cancellation::with_timeout(Duration::from_millis(20)))
            .await;
        assert!(matches!(result, Err(AppError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_file_locks_exclude_other_tables() {
        let temp = TempDir::new().unwrap();
        let first = DatasetLocks::with_lock_dir(temp.path());
        let second = DatasetLocks::with_lock_dir(temp.path());

        let guard = first.try_exclusive("ds-1").unwrap();
        assert!(matches!(
            second.try_exclusive("ds-1"),
            Err(AppError::LockContention { .. })
        ));
        assert!(temp.path().join("ds-1.lock").exists());

        drop(guard);
        assert!(second.try_exclusive("ds-1").is_ok());
    }
}
