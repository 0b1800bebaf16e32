//! Ephemeral key-value store with per-key TTL.
//!
//! Only the OAuth state handshake lives here. Two backends:
//! - [`RedisStore`]: pooled `ConnectionManager`, every call bounded by a timeout
//! - [`MemoryStore`]: process-local map for local development and tests

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Absent, expired, or already consumed.
    #[error("key not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Connectivity(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("stored value could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// Generic string store. Implementations must be safe for concurrent use.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<String, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Read and delete in one step. A second `take` of the same key fails
    /// with [`StoreError::NotFound`].
    async fn take(&self, key: &str) -> Result<String, StoreError> {
        let value = self.get(key).await?;
        self.delete(key).await?;
        Ok(value)
    }
}

/// Typed JSON helpers over any [`EphemeralStore`].
#[async_trait]
pub trait EphemeralStoreExt: EphemeralStore {
    async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(value)?;
        self.set(key, &encoded, ttl).await
    }

    #[cfg(test)]
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        let raw = self.get(key).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn take_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        let raw = self.take(key).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl<S: EphemeralStore + ?Sized> EphemeralStoreExt for S {}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

/// Redis-backed store. Clones share one multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn_manager: ConnectionManager,
    timeout: Duration,
}

impl RedisStore {
    /// Connect to Redis. Failure here is fatal for the process.
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Connectivity(format!("invalid redis url: {e}")))?;

        let conn_manager = bounded(timeout, ConnectionManager::new(client)).await?;

        tracing::info!(timeout_secs = timeout.as_secs(), "Connected to Redis");
        Ok(Self {
            conn_manager,
            timeout,
        })
    }
}

async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = redis::RedisResult<T>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(StoreError::Connectivity(e.to_string())),
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let ttl_seconds = ttl.as_secs().max(1);
        let _: () = bounded(self.timeout, conn.set_ex(key, value, ttl_seconds)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = bounded(self.timeout, conn.get(key)).await?;
        value.ok_or(StoreError::NotFound)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let removed: u64 = bounded(self.timeout, conn.del(key)).await?;
        if removed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<String, StoreError> {
        let mut conn = self.conn_manager.clone();
        // GETDEL: concurrent callbacks with the same key cannot both succeed
        let value: Option<String> = bounded(self.timeout, conn.get_del(key)).await?;
        value.ok_or(StoreError::NotFound)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Longest TTL the in-memory store honours; larger values are clamped.
const MEMORY_MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Process-local store. Expired entries are dropped lazily on access.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, (String, Instant)>) -> T,
    ) -> Result<T, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Connectivity("memory store lock poisoned".to_string()))?;
        let now = Instant::now();
        entries.retain(|_, (_, deadline)| *deadline > now);
        Ok(f(&mut entries))
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let deadline = Instant::now() + ttl.min(MEMORY_MAX_TTL);
        self.with_entries(|entries| {
            entries.insert(key.to_string(), (value.to_string(), deadline));
        })
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        self.with_entries(|entries| entries.get(key).map(|(v, _)| v.clone()))?
            .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.with_entries(|entries| entries.remove(key))?
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn take(&self, key: &str) -> Result<String, StoreError> {
        self.with_entries(|entries| entries.remove(key).map(|(v, _)| v))?
            .ok_or(StoreError::NotFound)
    }
}
