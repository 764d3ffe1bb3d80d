//! Durable backend with expiring writes.
//!
//! Each entry is one JSON envelope file under `<dir>/entries/`, named by the SHA-256 of
//! its storage key:
//!
//! ```json
//! {"key": "i:post-1", "written_at": "...", "expires_at": "...", "value": {"id": "post-1", ...}}
//! ```
//!
//! Values must be JSON documents; they are embedded verbatim so entries stay readable.
//! Writes go to a temporary file in the same directory and are renamed into place, so
//! readers only ever see complete envelopes. An entry whose `expires_at` has passed is
//! treated as absent and removed on read; expired entries are also purged when the
//! store opens. The directory is held with an exclusive [`DirectoryLock`] until
//! [`close`](StorageBackend::close).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::StorageBackend;
use super::lock::DirectoryLock;
use crate::core::{FeedgenError, Result};

const ENTRIES_DIR: &str = "entries";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    key: String,
    written_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    /// The stored record, verbatim
    value: Box<RawValue>,
}

impl Envelope {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// File-per-entry store with a retention window.
#[derive(Debug)]
pub struct DiskBackend {
    entries_dir: PathBuf,
    retention: Duration,
    /// `None` once closed
    lock: Mutex<Option<DirectoryLock>>,
}

impl DiskBackend {
    /// Open (or create) the store in `dir`.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::StorageError`] when the directory cannot be created or is locked
    /// by another process.
    pub fn open(dir: &Path, retention: Duration) -> Result<Self> {
        let lock = DirectoryLock::acquire(dir)?;
        let entries_dir = dir.join(ENTRIES_DIR);
        std::fs::create_dir_all(&entries_dir).map_err(|e| storage_error("open", e))?;

        let backend = Self {
            entries_dir,
            retention,
            lock: Mutex::new(Some(lock)),
        };
        let purged = backend.purge_expired()?;
        tracing::info!(
            "Opened disk repository at {} (retention {} days, {} expired entries purged)",
            dir.display(),
            retention.num_days(),
            purged
        );
        Ok(backend)
    }

    fn ensure_open(&self) -> Result<()> {
        match self.lock.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(_) => Ok(()),
            None => Err(FeedgenError::RepositoryClosed),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.entries_dir.join(format!("{}.json", hex::encode(hasher.finalize())))
    }

    fn read_envelope(path: &Path, key: &str) -> Result<Option<Envelope>> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error("get", e)),
        };
        serde_json::from_slice(&raw).map(Some).map_err(|e| FeedgenError::SerializationError {
            key: key.to_string(),
            reason: format!("corrupt entry {}: {e}", path.display()),
        })
    }

    fn remove_expired(path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove expired entry {}: {}", path.display(), e);
            }
        }
    }

    /// Delete every expired entry; unreadable files are left alone.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> Result<usize> {
        self.ensure_open()?;
        let now = Utc::now();
        let mut purged = 0;
        let dir = std::fs::read_dir(&self.entries_dir).map_err(|e| storage_error("purge", e))?;
        for entry in dir {
            let path = entry.map_err(|e| storage_error("purge", e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match Self::read_envelope(&path, "") {
                Ok(Some(envelope)) if envelope.is_expired(now) => {
                    Self::remove_expired(&path);
                    purged += 1;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable entry {}: {}", path.display(), e),
            }
        }
        Ok(purged)
    }
}

impl StorageBackend for DiskBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let path = self.entry_path(key);
        let Some(envelope) = Self::read_envelope(&path, key)? else {
            return Ok(None);
        };

        if envelope.is_expired(Utc::now()) {
            tracing::debug!("Entry {} expired at {}", key, envelope.expires_at);
            Self::remove_expired(&path);
            return Ok(None);
        }

        Ok(Some(envelope.value.get().as_bytes().to_vec()))
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        let value: Box<RawValue> =
            serde_json::from_slice(&value).map_err(|e| FeedgenError::SerializationError {
                key: key.to_string(),
                reason: format!("value is not a JSON document: {e}"),
            })?;
        let now = Utc::now();
        let envelope = Envelope {
            key: key.to_string(),
            written_at: now,
            expires_at: now + self.retention,
            value,
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|e| FeedgenError::SerializationError {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let mut temp =
            NamedTempFile::new_in(&self.entries_dir).map_err(|e| storage_error("put", e))?;
        temp.write_all(&bytes).map_err(|e| storage_error("put", e))?;
        temp.as_file().sync_all().map_err(|e| storage_error("put", e))?;
        temp.persist(self.entry_path(key)).map_err(|e| storage_error("put", e.error))?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner).take();
        match lock {
            Some(lock) => {
                tracing::debug!("Releasing {}", lock.path().display());
                drop(lock);
                Ok(())
            }
            None => Err(FeedgenError::RepositoryClosed),
        }
    }

    fn name(&self) -> &'static str {
        "disk"
    }
}

fn storage_error(operation: &str, error: std::io::Error) -> FeedgenError {
    FeedgenError::StorageError {
        operation: operation.to_string(),
        reason: error.to_string(),
    }
}
