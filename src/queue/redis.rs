//! Redis Reliable Queue
//!
//! Each channel is a Redis list. Producers `LPUSH`; a consumer atomically moves the oldest
//! item into its own processing list with `BLMOVE`, and removes it from there with `LREM`
//! once processing is settled.
//!
//! ## Consumer liveness
//! Every subscribed consumer registers itself in the channel's consumer set and keeps a
//! heartbeat key alive (expiring after one lease). A consumer name can only be held by one
//! live subscription at a time. Processing lists of registered consumers whose heartbeat
//! lapsed are pushed back onto the channel, with `attempt + 1`, by whichever subscription
//! sweeps first: at subscribe time and then once per lease while pulling.
//!
//! Requires Redis 6.2 or newer (`BLMOVE`).

use super::types::*;
use super::{Subscription, WorkQueue};
use crate::error::{CatalogError, Result};

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub struct RedisWorkQueue {
    client: redis::Client,
    connection: ConnectionManager,
    key_prefix: String,
    lease: Duration,
    block_timeout: Duration,
}

pub(crate) fn registry_key(prefix: &str) -> String {
    format!("{}channels", prefix)
}

pub(crate) fn channel_key(prefix: &str, channel: &str) -> String {
    format!("{}queue:{}", prefix, channel)
}

pub(crate) fn processing_key(prefix: &str, channel: &str, consumer: &str) -> String {
    format!("{}queue:{}:processing:{}", prefix, channel, consumer)
}

pub(crate) fn consumers_key(prefix: &str, channel: &str) -> String {
    format!("{}queue:{}:consumers", prefix, channel)
}

pub(crate) fn heartbeat_key(prefix: &str, channel: &str, consumer: &str) -> String {
    format!("{}queue:{}:heartbeat:{}", prefix, channel, consumer)
}

/// Registered consumers whose heartbeat is gone, never including `current`.
/// `alive[i]` is the heartbeat state of `registered[i]`.
pub(crate) fn orphaned_consumers(registered: &[String], alive: &[bool], current: &str) -> Vec<String> {
    registered
        .iter()
        .zip(alive)
        .filter(|(name, alive)| !**alive && name.as_str() != current)
        .map(|(name, _)| name.clone())
        .collect()
}

/// Keys and timings one consumer needs to prove it is alive and to sweep for orphans.
#[derive(Debug, Clone)]
struct ConsumerKeys {
    prefix: String,
    channel: String,
    consumer: String,
    queue: String,
    processing: String,
    heartbeat: String,
    consumers: String,
    lease_ms: u64,
}

impl ConsumerKeys {
    fn new(prefix: &str, channel: &str, consumer: &str, lease: Duration) -> Self {
        Self {
            prefix: prefix.to_string(),
            channel: channel.to_string(),
            consumer: consumer.to_string(),
            queue: channel_key(prefix, channel),
            processing: processing_key(prefix, channel, consumer),
            heartbeat: heartbeat_key(prefix, channel, consumer),
            consumers: consumers_key(prefix, channel),
            lease_ms: (lease.as_millis() as u64).max(1),
        }
    }
}

/// Pushes everything in `processing` back onto `queue`. Push happens before removal:
/// a crash in between duplicates, never loses.
async fn requeue_processing_list(connection: &mut ConnectionManager, queue: &str, processing: &str) -> Result<usize> {
    let stranded: Vec<Vec<u8>> = redis::cmd("LRANGE")
        .arg(processing)
        .arg(0)
        .arg(-1)
        .query_async(connection)
        .await?;

    let mut recovered = 0;
    for raw in stranded {
        match WorkItem::decode(&raw) {
            Ok(item) => {
                let _: () = redis::pipe()
                    .atomic()
                    .cmd("LPUSH")
                    .arg(queue)
                    .arg(item.retried().encode()?)
                    .ignore()
                    .cmd("LREM")
                    .arg(processing)
                    .arg(1)
                    .arg(&raw)
                    .ignore()
                    .query_async(connection)
                    .await?;
                recovered += 1;
            }
            Err(e) => {
                tracing::error!("Discarding undecodable stranded item in {}: {}", processing, e);
                let _: () = redis::cmd("LREM")
                    .arg(processing)
                    .arg(1)
                    .arg(&raw)
                    .query_async(connection)
                    .await?;
            }
        }
    }
    Ok(recovered)
}

/// Refreshes the heartbeat and re-registers the consumer (a sweeper may have dropped it
/// after a stall).
async fn beat(connection: &mut ConnectionManager, keys: &ConsumerKeys) -> Result<()> {
    let _: () = redis::pipe()
        .atomic()
        .cmd("SET")
        .arg(&keys.heartbeat)
        .arg(now_ms())
        .arg("PX")
        .arg(keys.lease_ms)
        .ignore()
        .cmd("SADD")
        .arg(&keys.consumers)
        .arg(&keys.consumer)
        .ignore()
        .query_async(connection)
        .await?;
    Ok(())
}

/// Requeues the processing lists of every registered consumer whose heartbeat lapsed.
async fn sweep_orphans(connection: &mut ConnectionManager, keys: &ConsumerKeys) -> Result<usize> {
    let registered: Vec<String> = redis::cmd("SMEMBERS")
        .arg(&keys.consumers)
        .query_async(connection)
        .await?;

    let mut alive = Vec::with_capacity(registered.len());
    for name in &registered {
        let exists: i64 = redis::cmd("EXISTS")
            .arg(heartbeat_key(&keys.prefix, &keys.channel, name))
            .query_async(connection)
            .await?;
        alive.push(exists > 0);
    }

    let mut recovered = 0;
    for orphan in orphaned_consumers(&registered, &alive, &keys.consumer) {
        // Only the sweeper whose SREM lands owns the recovery.
        let claimed: i64 = redis::cmd("SREM")
            .arg(&keys.consumers)
            .arg(&orphan)
            .query_async(connection)
            .await?;
        if claimed == 0 {
            continue;
        }

        let processing = processing_key(&keys.prefix, &keys.channel, &orphan);
        let count = requeue_processing_list(connection, &keys.queue, &processing).await?;
        if count > 0 {
            tracing::warn!(
                "Recovered {} in-flight items of lapsed consumer {} on {}",
                count,
                orphan,
                keys.channel
            );
        }
        recovered += count;
    }
    Ok(recovered)
}

impl RedisWorkQueue {
    /// Connects eagerly; an unreachable server is a startup configuration failure.
    /// `lease` is how long a silent consumer keeps its in-flight items.
    pub async fn connect(url: &str, key_prefix: &str, lease: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CatalogError::Configuration(format!("invalid redis url {}: {}", url, e)))?;
        let connection = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| CatalogError::Configuration(format!("cannot reach redis at {}: {}", url, e)))?;

        tracing::info!("Connected work queue to redis at {}", url);
        Ok(Self {
            client,
            connection,
            key_prefix: key_prefix.to_string(),
            lease,
            block_timeout: Duration::from_secs(1),
        })
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn declare(&self, channel: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = redis::cmd("SADD")
            .arg(registry_key(&self.key_prefix))
            .arg(channel)
            .query_async(&mut connection)
            .await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, item: &WorkItem) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = redis::cmd("LPUSH")
            .arg(channel_key(&self.key_prefix, channel))
            .arg(item.encode()?)
            .query_async(&mut connection)
            .await?;
        Ok(())
    }

    /// Fails with `TransientIo` while another live subscription holds `consumer`; it can be
    /// retried once that holder's heartbeat lapses.
    async fn subscribe(&self, channel: &str, consumer: &str) -> Result<Arc<dyn Subscription>> {
        let keys = ConsumerKeys::new(&self.key_prefix, channel, consumer, self.lease);
        let mut connection = self.connection.clone();

        let claimed: Option<String> = redis::cmd("SET")
            .arg(&keys.heartbeat)
            .arg(now_ms())
            .arg("NX")
            .arg("PX")
            .arg(keys.lease_ms)
            .query_async(&mut connection)
            .await?;
        if claimed.is_none() {
            return Err(CatalogError::TransientIo(format!(
                "consumer {} is still active on {}",
                consumer, channel
            )));
        }
        beat(&mut connection, &keys).await?;

        // Left behind by an earlier holder of this name.
        let own = requeue_processing_list(&mut connection, &keys.queue, &keys.processing).await?;
        if own > 0 {
            tracing::warn!("Recovered {} in-flight items left by {} on {}", own, consumer, channel);
        }
        sweep_orphans(&mut connection, &keys).await?;

        // Blocking pulls get their own connection so they never stall acks or publishes.
        let blocking = self.client.get_multiplexed_async_connection().await?;

        Ok(Arc::new(RedisSubscription {
            blocking,
            control: self.connection.clone(),
            block_secs: self.block_timeout.as_secs_f64(),
            sweep_every: self.lease,
            last_sweep: Mutex::new(Instant::now()),
            keys,
        }))
    }
}

pub struct RedisSubscription {
    blocking: MultiplexedConnection,
    control: ConnectionManager,
    block_secs: f64,
    sweep_every: Duration,
    last_sweep: Mutex<Instant>,
    keys: ConsumerKeys,
}

impl RedisSubscription {
    async fn remove_from_processing(&self, raw: &[u8]) -> Result<()> {
        let mut connection = self.control.clone();
        let _: () = redis::cmd("LREM")
            .arg(&self.keys.processing)
            .arg(1)
            .arg(raw)
            .query_async(&mut connection)
            .await?;
        Ok(())
    }

    /// Heartbeat on every pull, orphan sweep at most once per lease.
    async fn keep_alive(&self) -> Result<()> {
        let mut connection = self.control.clone();
        beat(&mut connection, &self.keys).await?;

        let due = match self.last_sweep.lock() {
            Ok(mut last) if last.elapsed() >= self.sweep_every => {
                *last = Instant::now();
                true
            }
            _ => false,
        };
        if due {
            sweep_orphans(&mut connection, &self.keys).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next(&self) -> Result<Delivery> {
        let mut connection = self.blocking.clone();
        loop {
            self.keep_alive().await?;

            let raw: Option<Vec<u8>> = redis::cmd("BLMOVE")
                .arg(&self.keys.queue)
                .arg(&self.keys.processing)
                .arg("RIGHT")
                .arg("LEFT")
                .arg(self.block_secs)
                .query_async(&mut connection)
                .await?;

            let Some(raw) = raw else {
                continue;
            };

            match WorkItem::decode(&raw) {
                Ok(item) => {
                    // Valid JSON is valid UTF-8, so the tag round-trips byte for byte.
                    let tag = DeliveryTag(String::from_utf8_lossy(&raw).into_owned());
                    return Ok(Delivery { tag, item });
                }
                Err(e) => {
                    tracing::error!("Dropping undecodable message on {}: {}", self.keys.queue, e);
                    self.remove_from_processing(&raw).await?;
                }
            }
        }
    }

    async fn ack(&self, tag: &DeliveryTag) -> Result<()> {
        self.remove_from_processing(tag.0.as_bytes()).await
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        let mut connection = self.control.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(&self.keys.queue)
            .arg(delivery.item.retried().encode()?)
            .ignore()
            .cmd("LREM")
            .arg(&self.keys.processing)
            .arg(1)
            .arg(delivery.tag.0.as_bytes())
            .ignore()
            .query_async(&mut connection)
            .await?;
        Ok(())
    }

    /// Keeps the consumer's heartbeat alive while an item is being processed.
    async fn renew(&self, _tag: &DeliveryTag) -> Result<()> {
        let mut connection = self.control.clone();
        beat(&mut connection, &self.keys).await
    }
}
