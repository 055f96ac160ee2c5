//! Job status cache.
//!
//! Maps a callback id to the latest [`TransformationStatus`] of its job.
//! Entries expire after a fixed TTL; every write refreshes it.
//!
//! ```text
//! producer ──put(pending)──┐
//!                          ▼
//!                    ┌────────────┐
//!                    │ StatusCache│──► StatusStore (Redis | memory)
//!                    └────────────┘
//!                          ▲
//! worker ──put(done|failed)┘          poller ──get_raw──► JSON as stored
//! ```
//!
//! Writes are last-writer-wins per key. Only the producer writes `pending`
//! and only the worker that owns a job writes its terminal state.

mod memory;
mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CacheError;
use crate::model::{CallbackId, TransformationStatus};

pub use self::memory::{MemoryStatusStore, DEFAULT_MAX_STATUSES};
pub use self::redis_store::RedisStatusStore;

/// Default status time-to-live: one hour.
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(3600);

/// Raw key/value storage with expiry.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError>;

    /// Fetch the value under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;
}

/// Typed status access over a [`StatusStore`].
#[derive(Clone)]
pub struct StatusCache {
    store: Arc<dyn StatusStore>,
    ttl: Duration,
}

impl StatusCache {
    pub fn new(store: Arc<dyn StatusStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// A cache over a fresh [`MemoryStatusStore`].
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryStatusStore::new()), ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Write `status` under its callback id.
    pub async fn put(&self, status: &TransformationStatus) -> Result<(), CacheError> {
        let payload =
            serde_json::to_vec(status).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.store
            .set(&status.status_id.to_string(), Bytes::from(payload), self.ttl)
            .await
    }

    /// Read and decode the status for `id`.
    pub async fn get(&self, id: &CallbackId) -> Result<Option<TransformationStatus>, CacheError> {
        match self.store.get(&id.to_string()).await? {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Read the stored JSON for `key` without decoding it.
    pub async fn get_raw(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        self.store.get(key).await
    }
}
