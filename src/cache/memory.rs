use super::LookupCache;
use crate::error::Result;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheSlot {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// In-process cache. Expired entries are evicted lazily on read.
#[derive(Default)]
pub struct MemoryCache {
    slots: DashMap<String, CacheSlot>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl LookupCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let expired = match self.slots.get(key) {
            None => return Ok(None),
            Some(slot) => match slot.expires_at {
                Some(deadline) if Instant::now() >= deadline => true,
                _ => return Ok(Some(slot.value.clone())),
            },
        };

        if expired {
            self.slots.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.slots.insert(
            key.to_string(),
            CacheSlot {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool> {
        let now = Instant::now();
        let slot = CacheSlot {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
        };

        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut existing) => {
                let expired = existing.get().expires_at.is_some_and(|deadline| now >= deadline);
                if !expired {
                    return Ok(false);
                }
                existing.insert(slot);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
            }
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.slots.remove(key);
        Ok(())
    }
}
