//! Exclusive ownership of a data directory.
//!
//! The disk store keeps one lock file (`.lock`) in its directory and holds an exclusive
//! OS-level lock on it for as long as the store is open, so two feedgen processes never
//! share a directory. Locking uses [`fs4`], which maps to `flock` on Unix and
//! `LockFileEx` on Windows. The lock is released when the [`DirectoryLock`] is dropped.

use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::core::{FeedgenError, Result};

/// Name of the lock file inside the data directory.
pub const LOCK_FILE_NAME: &str = ".lock";

/// Held exclusive lock on a data directory.
#[derive(Debug)]
pub struct DirectoryLock {
    file: File,
    path: PathBuf,
}

impl DirectoryLock {
    /// Lock `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::StorageError`] when the directory cannot be created or another
    /// process already holds the lock.
    pub fn acquire(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| FeedgenError::StorageError {
            operation: "open".to_string(),
            reason: format!("cannot create directory {}: {e}", dir.display()),
        })?;

        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| FeedgenError::StorageError {
                operation: "open".to_string(),
                reason: format!("cannot open lock file {}: {e}", path.display()),
            })?;

        match file.try_lock_exclusive() {
            Ok(true) => {
                tracing::debug!("Acquired data directory lock {}", path.display());
                Ok(Self {
                    file,
                    path,
                })
            }
            Ok(false) => Err(FeedgenError::StorageError {
                operation: "open".to_string(),
                reason: format!("{} is in use by another process", dir.display()),
            }),
            Err(e) => Err(FeedgenError::StorageError {
                operation: "open".to_string(),
                reason: format!("cannot lock {}: {e}", path.display()),
            }),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        #[allow(unstable_name_collisions)]
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}
