//! In-Process Lease Queue
//!
//! Items live in a per-channel `DashMap` keyed by a monotonically increasing sequence
//! number, so the lowest available sequence is always the oldest item (FIFO).
//!
//! ## Leasing
//! Delivering an item "claims" it: the status flips to `InFlight`, a lease deadline is set
//! and a fresh lease token is minted. The token travels in the `DeliveryTag`, so a late
//! `ack` from a consumer whose lease already expired (and whose item was handed to someone
//! else) is recognized as stale and ignored.

use super::types::*;
use super::{Subscription, WorkQueue};
use crate::error::{CatalogError, Result};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Delivery state of a queued item.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryStatus {
    /// Waiting for a consumer.
    Pending,
    /// Claimed by a consumer; accompanied by `lease_expires` in `QueueEntry`.
    InFlight,
}

#[derive(Debug, Clone)]
struct QueueEntry {
    item: WorkItem,
    status: EntryStatus,
    consumer: Option<String>,
    lease_token: Option<String>,
    /// Timestamp (ms) after which an in-flight item is considered abandoned.
    lease_expires: Option<u64>,
}

struct Channel {
    name: String,
    entries: DashMap<u64, QueueEntry>,
    next_seq: AtomicU64,
    notify: Notify,
    lease_ms: u64,
}

impl Channel {
    fn new(name: &str, lease: Duration) -> Self {
        Self {
            name: name.to_string(),
            entries: DashMap::new(),
            next_seq: AtomicU64::new(0),
            notify: Notify::new(),
            lease_ms: lease.as_millis() as u64,
        }
    }

    fn enqueue(&self, item: WorkItem) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(
            seq,
            QueueEntry {
                item,
                status: EntryStatus::Pending,
                consumer: None,
                lease_token: None,
                lease_expires: None,
            },
        );
        self.notify.notify_one();
    }

    fn is_available(entry: &QueueEntry, now: u64) -> bool {
        match entry.status {
            EntryStatus::Pending => true,
            EntryStatus::InFlight => entry.lease_expires.map(|lease| now > lease).unwrap_or(false),
        }
    }

    /// Sequence numbers of deliverable items, oldest first.
    fn available(&self) -> Vec<u64> {
        let now = now_ms();
        let mut seqs: Vec<u64> = self
            .entries
            .iter()
            .filter(|entry| Self::is_available(entry.value(), now))
            .map(|entry| *entry.key())
            .collect();
        seqs.sort_unstable();
        seqs
    }

    /// Attempts to lock an available item for `consumer`. Another subscription may have
    /// raced us between `available()` and here, in which case this returns `None`.
    fn try_claim(&self, seq: u64, consumer: &str) -> Option<Delivery> {
        let mut entry = self.entries.get_mut(&seq)?;
        let now = now_ms();
        if !Self::is_available(&entry, now) {
            return None;
        }

        if entry.status == EntryStatus::InFlight {
            tracing::warn!(
                "Lease on item {} of channel {} expired (held by {:?}), redelivering",
                seq,
                self.name,
                entry.consumer
            );
            entry.item = entry.item.retried();
        }

        let token = uuid::Uuid::new_v4().to_string();
        entry.status = EntryStatus::InFlight;
        entry.consumer = Some(consumer.to_string());
        entry.lease_token = Some(token.clone());
        entry.lease_expires = Some(now + self.lease_ms);

        Some(Delivery {
            tag: DeliveryTag(format!("{}/{}", seq, token)),
            item: entry.item.clone(),
        })
    }

    /// Removes the claimed entry if `tag` still holds its lease.
    fn settle(&self, tag: &DeliveryTag) -> Result<Option<WorkItem>> {
        let (seq, token) = parse_tag(tag)?;
        let removed = self.entries.remove_if(&seq, |_, entry| {
            entry.status == EntryStatus::InFlight && entry.lease_token.as_deref() == Some(token)
        });

        match removed {
            Some((_, entry)) => Ok(Some(entry.item)),
            None => {
                tracing::warn!("Ignoring stale delivery {} on channel {}", tag.0, self.name);
                Ok(None)
            }
        }
    }

    fn renew(&self, tag: &DeliveryTag) -> Result<()> {
        let (seq, token) = parse_tag(tag)?;
        let mut entry = self
            .entries
            .get_mut(&seq)
            .ok_or_else(|| CatalogError::Validation(format!("delivery {} is no longer queued", tag.0)))?;

        if entry.status != EntryStatus::InFlight || entry.lease_token.as_deref() != Some(token) {
            return Err(CatalogError::Validation(format!("delivery {} no longer holds its lease", tag.0)));
        }
        entry.lease_expires = Some(now_ms() + self.lease_ms);
        tracing::trace!("Renewed lease for item {} of channel {}", seq, self.name);
        Ok(())
    }

    fn counts(&self) -> (usize, usize) {
        let mut pending = 0;
        let mut in_flight = 0;
        for entry in self.entries.iter() {
            match entry.status {
                EntryStatus::Pending => pending += 1,
                EntryStatus::InFlight => in_flight += 1,
            }
        }
        (pending, in_flight)
    }
}

fn parse_tag(tag: &DeliveryTag) -> Result<(u64, &str)> {
    let (seq, token) = tag
        .0
        .split_once('/')
        .ok_or_else(|| CatalogError::CorruptData(format!("malformed delivery tag {}", tag.0)))?;
    let seq = seq
        .parse::<u64>()
        .map_err(|_| CatalogError::CorruptData(format!("malformed delivery tag {}", tag.0)))?;
    Ok((seq, token))
}

/// In-process work queue. Survives worker crashes (via leases) but not process restarts.
pub struct MemoryWorkQueue {
    channels: DashMap<String, Arc<Channel>>,
    lease: Duration,
    poll_interval: Duration,
}

impl MemoryWorkQueue {
    pub fn new(lease: Duration) -> Self {
        Self {
            channels: DashMap::new(),
            lease,
            poll_interval: Duration::from_millis(100),
        }
    }

    fn channel(&self, name: &str) -> Result<Arc<Channel>> {
        self.channels
            .get(name)
            .map(|channel| channel.value().clone())
            .ok_or_else(|| CatalogError::Validation(format!("channel {} has not been declared", name)))
    }

    /// `(pending, in_flight)` item counts for a channel.
    pub fn depth(&self, channel: &str) -> (usize, usize) {
        self.channels
            .get(channel)
            .map(|channel| channel.counts())
            .unwrap_or((0, 0))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn declare(&self, channel: &str) -> Result<()> {
        let lease = self.lease;
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(Channel::new(channel, lease)));
        Ok(())
    }

    async fn publish(&self, channel: &str, item: &WorkItem) -> Result<()> {
        self.channel(channel)?.enqueue(item.clone());
        tracing::debug!(
            "Published image {} of product {} to {}",
            item.image_index,
            item.product_id,
            channel
        );
        Ok(())
    }

    async fn subscribe(&self, channel: &str, consumer: &str) -> Result<Arc<dyn Subscription>> {
        Ok(Arc::new(MemorySubscription {
            channel: self.channel(channel)?,
            consumer: consumer.to_string(),
            poll_interval: self.poll_interval,
        }))
    }
}

pub struct MemorySubscription {
    channel: Arc<Channel>,
    consumer: String,
    poll_interval: Duration,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&self) -> Result<Delivery> {
        loop {
            for seq in self.channel.available() {
                if let Some(delivery) = self.channel.try_claim(seq, &self.consumer) {
                    tracing::trace!("{} claimed item {}", self.consumer, seq);
                    return Ok(delivery);
                }
            }

            // Woken by a publish, or by the poll tick so expired leases get picked up.
            let _ = tokio::time::timeout(self.poll_interval, self.channel.notify.notified()).await;
        }
    }

    async fn ack(&self, tag: &DeliveryTag) -> Result<()> {
        self.channel.settle(tag)?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        if let Some(item) = self.channel.settle(&delivery.tag)? {
            self.channel.enqueue(item.retried());
        }
        Ok(())
    }

    async fn renew(&self, tag: &DeliveryTag) -> Result<()> {
        self.channel.renew(tag)
    }
}
