use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use super::StatusStore;
use crate::error::CacheError;

/// Redis-backed status store.
///
/// Every write is a `SET key value EX ttl`, so expiry is enforced by Redis.
/// The connection manager reconnects on its own; clones share one
/// multiplexed connection.
#[derive(Clone)]
pub struct RedisStatusStore {
    conn: ConnectionManager,
}

impl RedisStatusStore {
    /// Connect to the Redis server at `url` (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(url).map_err(|e| CacheError::Connection(e.to_string()))?;
        // Only host and port: the URL may carry credentials
        let addr = client.get_connection_info().addr.to_string();
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        info!(addr = %addr, "Connected to Redis status store");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        // Redis rejects EX 0
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value.as_ref(), seconds).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value.map(Bytes::from))
    }
}
