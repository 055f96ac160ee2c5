//! In-process status store.
//!
//! An LRU map whose entries carry an expiry deadline. Expired entries are
//! dropped lazily on read, and the least-recently-used entry is evicted once
//! the entry limit is reached. Suited to single-process deployments and tests;
//! statuses do not survive a restart.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::StatusStore;
use crate::error::CacheError;

/// Default maximum number of live statuses.
pub const DEFAULT_MAX_STATUSES: usize = 100_000;

struct Entry {
    data: Bytes,
    expires_at: Instant,
}

/// LRU status store with per-entry expiry.
pub struct MemoryStatusStore {
    entries: Mutex<LruCache<String, Entry>>,
}

impl Default for MemoryStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStatusStore {
    /// Create a store holding up to [`DEFAULT_MAX_STATUSES`] entries.
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_STATUSES)
    }

    /// Create a store with a specific entry limit. Zero is treated as one.
    pub fn with_max_entries(max_entries: usize) -> Self {
        let limit = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(limit)),
        }
    }

    /// Number of stored entries, including expired ones not yet reaped.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry {
            data: value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().await.put(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut entries = self.entries.lock().await;

        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.data.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
        }
        Ok(None)
    }
}
