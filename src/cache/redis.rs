use super::LookupCache;
use crate::error::{CatalogError, Result};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Redis-backed cache. `ConnectionManager` reconnects on its own, so a Redis restart
/// shows up as a handful of failed calls (degraded to misses by the caller), not a dead handle.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    /// Connects eagerly; an unreachable server is a startup configuration failure.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CatalogError::Configuration(format!("invalid redis url {}: {}", url, e)))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| CatalogError::Configuration(format!("cannot reach redis at {}: {}", url, e)))?;

        tracing::info!("Connected cache to redis at {}", url);
        Ok(Self { connection })
    }
}

/// Arguments for `SET`: millisecond expiry only when a TTL is given.
pub(crate) fn expiry_millis(ttl: Option<Duration>) -> Option<u64> {
    ttl.map(|ttl| (ttl.as_millis() as u64).max(1))
}

#[async_trait]
impl LookupCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut connection = self.connection.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut connection).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut connection = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(millis) = expiry_millis(ttl) {
            cmd.arg("PX").arg(millis);
        }
        let _: () = cmd.query_async(&mut connection).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool> {
        let mut connection = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(millis) = expiry_millis(ttl) {
            cmd.arg("PX").arg(millis);
        }
        let stored: Option<String> = cmd.query_async(&mut connection).await?;
        Ok(stored.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut connection).await?;
        Ok(())
    }
}
