//! Redis-backed shared store
//!
//! Lets several gateway processes share one slot pool and one set of
//! sessions, and keeps both across restarts.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};

use super::{SharedStore, StoreError, StoreResult};

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Store on a Redis server, selected with `redis://`
pub struct RedisStore {
    client: Client,
    /// Multiplexed, reconnecting connection for non-blocking commands
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: usize = conn.del(key).await?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.rpush(key, value).await?)
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        // A blocking pop would stall every command queued behind it on the
        // shared multiplexed connection, so it gets a connection of its own.
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // BLPOP treats a zero timeout as "wait forever"
        if timeout.is_zero() {
            let popped: Option<String> = redis::cmd("LPOP").arg(key).query_async(&mut conn).await?;
            return Ok(popped);
        }

        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn llen(&self, key: &str) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(key).await?)
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.client.get_connection_info().addr)
            .finish()
    }
}
