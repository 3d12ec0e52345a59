//! Work Queue Module
//!
//! Durable, at-least-once channel decoupling ingestion (producers) from the image
//! processing workers (consumers).
//!
//! ## Delivery Model
//! 1. **Declare**: channels are declared idempotently before use.
//! 2. **Publish**: producers append a `WorkItem` to the tail of the channel.
//! 3. **Deliver**: a subscription pulls one item at a time. The item is now *in flight* and
//!    exclusively owned by that subscription.
//! 4. **Settle**: `ack` removes the item for good; `nack` puts it back at the tail with its
//!    attempt counter bumped. An in-flight item whose consumer vanishes without settling
//!    becomes deliverable again (lease expiry in memory, processing-list recovery in Redis).
//!
//! ## Submodules
//! - **`types`**: `WorkItem`, `Delivery`, delivery tags.
//! - **`memory`**: lease-based in-process queue.
//! - **`redis`**: reliable-list queue on Redis (`LPUSH` / `BLMOVE` / `LREM`).

pub mod memory;
pub mod redis;
pub mod types;

use crate::error::Result;
use types::{Delivery, DeliveryTag, WorkItem};

use async_trait::async_trait;
use std::sync::Arc;

/// Name of the channel image work items travel on.
pub const DEFAULT_CHANNEL: &str = "image_queue";

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Creates the channel if needed. Declaring twice is a no-op.
    async fn declare(&self, channel: &str) -> Result<()>;

    async fn publish(&self, channel: &str, item: &WorkItem) -> Result<()>;

    /// Opens a pull subscription. `consumer` must be stable across restarts of the same
    /// worker so that items it left in flight can be recovered.
    async fn subscribe(&self, channel: &str, consumer: &str) -> Result<Arc<dyn Subscription>>;
}

#[async_trait]
pub trait Subscription: Send + Sync {
    /// Blocks until an item is available.
    async fn next(&self) -> Result<Delivery>;

    async fn ack(&self, tag: &DeliveryTag) -> Result<()>;

    /// Returns the item to the channel tail with `attempt + 1`.
    async fn nack(&self, delivery: &Delivery) -> Result<()>;

    /// Extends the in-flight lease of a long-running item.
    async fn renew(&self, _tag: &DeliveryTag) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests;
