use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::StorageBackend;
use crate::core::{FeedgenError, Result};

/// Volatile backend: a mutex-guarded map, no expiry.
///
/// Everything is lost when the process exits or the backend is closed.
#[derive(Debug)]
pub struct MemoryBackend {
    /// `None` once closed
    entries: Mutex<Option<HashMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Some(HashMap::new())),
        }
    }

    /// Number of stored entries, 0 when closed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).as_ref().map_or(0, HashMap::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = entries.as_ref().ok_or(FeedgenError::RepositoryClosed)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = entries.as_mut().ok_or(FeedgenError::RepositoryClosed)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.take().is_none() {
            return Err(FeedgenError::RepositoryClosed);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
