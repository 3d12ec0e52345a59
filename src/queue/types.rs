use crate::catalog::types::ProductId;
use serde::{Deserialize, Serialize};

/// One image reference of one product, queued for processing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkItem {
    pub product_id: ProductId,
    /// Position of the image in the product's original reference list.
    pub image_index: usize,
    pub image_url: String,
    /// Number of earlier deliveries that ended without success.
    #[serde(default)]
    pub attempt: u32,
}

impl WorkItem {
    pub fn new(product_id: ProductId, image_index: usize, image_url: impl Into<String>) -> Self {
        Self {
            product_id,
            image_index,
            image_url: image_url.into(),
            attempt: 0,
        }
    }

    /// Same item, one more failed attempt on the counter.
    pub fn retried(&self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// Opaque handle identifying one in-flight delivery for `ack`/`nack`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub String);

#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub item: WorkItem,
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
