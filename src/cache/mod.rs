//! Fast Lookup Cache Module
//!
//! Volatile key/value storage for serialized record snapshots. The core never locks
//! around it: both implementations are safe to share across tasks.
//!
//! ## Submodules
//! - **`memory`**: DashMap-backed cache with optional per-entry TTL.
//! - **`redis`**: Redis-backed cache over a reconnecting `ConnectionManager`.

pub mod memory;
pub mod redis;

use crate::error::Result;

use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait LookupCache: Send + Sync {
    /// `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`; `ttl = None` means no expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Like `set`, but leaves a live entry alone. Returns whether `value` was stored.
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;
}
