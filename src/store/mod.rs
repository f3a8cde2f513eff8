//! Shared key/value store
//!
//! The slot pool and the session records live in one shared store. The
//! interface is the small subset of list and string commands the gateway
//! needs: expiring values, and lists with a blocking left pop.
//!
//! - `MemoryStore`: in-process store, selected with `memory://`
//! - `RedisStore`: Redis server, selected with `redis://`
//! - `UnavailableStore`: stand-in used when the configured store cannot be
//!   reached at startup; every operation fails

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Store failures
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported store url: {0}")]
    UnsupportedUrl(String),

    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Operations the gateway needs from its backing store
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Check the store is reachable
    async fn ping(&self) -> StoreResult<()>;

    /// Read a string value; `None` if absent or expired
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a string value that expires after `ttl`
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Remove a key of any type
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Append to the tail of a list, returning the new length
    async fn rpush(&self, key: &str, value: &str) -> StoreResult<usize>;

    /// Pop the head of a list, waiting up to `timeout` for an element
    async fn blpop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>>;

    /// Length of a list
    async fn llen(&self, key: &str) -> StoreResult<usize>;
}

/// Store that fails every operation with the same reason
#[derive(Debug, Clone)]
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn err<T>(&self) -> StoreResult<T> {
        Err(StoreError::Unavailable(self.reason.clone()))
    }
}

#[async_trait]
impl SharedStore for UnavailableStore {
    async fn ping(&self) -> StoreResult<()> {
        self.err()
    }

    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        self.err()
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> StoreResult<()> {
        self.err()
    }

    async fn delete(&self, _key: &str) -> StoreResult<()> {
        self.err()
    }

    async fn rpush(&self, _key: &str, _value: &str) -> StoreResult<usize> {
        self.err()
    }

    async fn blpop(&self, _key: &str, _timeout: Duration) -> StoreResult<Option<String>> {
        self.err()
    }

    async fn llen(&self, _key: &str) -> StoreResult<usize> {
        self.err()
    }
}

/// Open the store named by a connection string
pub async fn connect(url: &str) -> StoreResult<Arc<dyn SharedStore>> {
    match url.trim() {
        "memory" | "memory://" => Ok(Arc::new(MemoryStore::new())),
        url if url.starts_with("redis://") => {
            Ok(Arc::new(RedisStore::connect(url).await?))
        }
        other => Err(StoreError::UnsupportedUrl(other.to_string())),
    }
}

/// Open the store, falling back to [`UnavailableStore`] so the process can
/// still start and report the dependency as unhealthy.
pub async fn connect_or_unavailable(url: &str) -> Arc<dyn SharedStore> {
    let store = match connect(url).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open shared store '{}': {}", url, e);
            return Arc::new(UnavailableStore::new(e.to_string()));
        }
    };

    match store.ping().await {
        Ok(()) => {
            tracing::info!("Successfully connected to shared store.");
            store
        }
        Err(e) => {
            tracing::error!("Failed to connect to shared store on startup: {}", e);
            Arc::new(UnavailableStore::new(e.to_string()))
        }
    }
}
