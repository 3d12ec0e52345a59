//! Ingestion Data Types

use crate::catalog::types::ProductId;
use crate::queue::DEFAULT_CHANNEL;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Knobs for the pipeline's collaborator calls.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Work queue channel image items are published to.
    pub channel: String,
    pub store_timeout: Duration,
    pub cache_timeout: Duration,
    pub queue_timeout: Duration,
    /// Expiry of the write-through cache entry. `None` keeps it until overwritten.
    pub cache_ttl: Option<Duration>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            store_timeout: Duration::from_secs(2),
            cache_timeout: Duration::from_millis(500),
            queue_timeout: Duration::from_secs(2),
            cache_ttl: None,
        }
    }
}

/// Returned by a successful submit: the assigned id plus the background dispatch.
#[derive(Debug)]
pub struct Submission {
    pub id: ProductId,
    pub dispatch: JoinHandle<DispatchReport>,
}

/// A single publish that did not make it onto the queue.
#[derive(Debug, Clone)]
pub struct PublishFailure {
    pub image_index: usize,
    pub error: String,
}

/// Outcome of the background dispatch for one product.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub product_id: ProductId,
    /// Whether the write-through cache fill succeeded.
    pub cached: bool,
    pub attempted: usize,
    pub published: usize,
    pub failures: Vec<PublishFailure>,
}

impl DispatchReport {
    pub fn new(product_id: ProductId) -> Self {
        Self {
            product_id,
            cached: false,
            attempted: 0,
            published: 0,
            failures: Vec::new(),
        }
    }
}
