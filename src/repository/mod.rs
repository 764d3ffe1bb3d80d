//! Cache repository for generated feeds and items.
//!
//! Generation consults the repository to decide whether a scraped record is new,
//! unchanged or updated. Records are addressed by a [`Key`] and stored under a type
//! prefix so feed and item keys never collide:
//!
//! | Record | Storage key |
//! |--------|-------------|
//! | feed   | `f:<key>`   |
//! | item   | `i:<key>`   |
//!
//! Values are JSON-encoded [`Feed`]/[`Item`] records. A missing key is `Ok(None)`;
//! a stored value that no longer decodes is a [`FeedgenError::SerializationError`].
//!
//! Two backends are available:
//!
//! - [`MemoryBackend`]: volatile, no expiry (the `--no-cache` mode)
//! - [`DiskBackend`]: one file per entry, entries expire after a retention window
//!   ([`DEFAULT_RETENTION_DAYS`] unless configured)
//!
//! The handle is shared process-wide and closed once at shutdown; operations after
//! [`Repository::close`] fail with [`FeedgenError::RepositoryClosed`].

mod disk;
mod key;
mod lock;
mod memory;

pub use disk::DiskBackend;
pub use key::{DERIVED_KEY_SEPARATOR, Key};
pub use lock::{DirectoryLock, LOCK_FILE_NAME};
pub use memory::MemoryBackend;

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::{FeedgenError, Result};
use crate::models::{Feed, Item};

/// Storage prefix of feed records.
pub const FEED_PREFIX: &str = "f";

/// Storage prefix of item records.
pub const ITEM_PREFIX: &str = "i";

/// Retention of the disk backend when none is configured.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Byte-level key/value store behind a [`Repository`].
///
/// Implementations must be safe for concurrent use from several generation calls.
pub trait StorageBackend: Send + Sync {
    /// Read the value stored under `key`, `None` when absent or expired.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// `value` is the JSON encoding of a record; [`DiskBackend`] rejects anything else.
    fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Release the store. Later operations fail with [`FeedgenError::RepositoryClosed`].
    fn close(&self) -> Result<()>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Typed feed/item access over a [`StorageBackend`].
#[derive(Clone)]
pub struct Repository {
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").field("backend", &self.backend.name()).finish()
    }
}

impl Repository {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
        }
    }

    /// Volatile repository.
    #[must_use]
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Durable repository in `dir` with the given retention.
    pub fn open_disk(dir: &Path, retention_days: i64) -> Result<Self> {
        let backend = DiskBackend::open(dir, chrono::Duration::days(retention_days))?;
        Ok(Self::new(Arc::new(backend)))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn get_feed(&self, key: &Key) -> Result<Option<Feed>> {
        self.read(&storage_key(FEED_PREFIX, key))
    }

    pub fn put_feed(&self, key: &Key, feed: &Feed) -> Result<()> {
        self.write(&storage_key(FEED_PREFIX, key), feed)
    }

    pub fn get_item(&self, key: &Key) -> Result<Option<Item>> {
        self.read(&storage_key(ITEM_PREFIX, key))
    }

    pub fn put_item(&self, key: &Key, item: &Item) -> Result<()> {
        self.write(&storage_key(ITEM_PREFIX, key), item)
    }

    /// Close the underlying backend.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::RepositoryClosed`] when already closed.
    pub fn close(&self) -> Result<()> {
        tracing::debug!("Closing {} repository", self.backend.name());
        self.backend.close()
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(bytes) = self.backend.get(key)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|e| FeedgenError::SerializationError {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| FeedgenError::SerializationError {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.backend.put(key, bytes)
    }
}

fn storage_key(prefix: &str, key: &Key) -> String {
    format!("{prefix}:{}", key.render())
}
