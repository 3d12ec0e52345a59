//! Authoritative Product Store
//!
//! `ProductStore` is the interface the core consumes: Insert, GetByID, Query, plus the
//! attach path the processing workers use to link derived artifacts back to a record.

use super::types::*;
use crate::error::Result;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Persists a new record and returns the identifier assigned to it.
    async fn insert(&self, product: NewProduct) -> Result<ProductId>;

    /// `Ok(None)` means not found; `Err` is reserved for real read failures.
    async fn get_by_id(&self, id: ProductId) -> Result<Option<Product>>;

    async fn query(&self, filter: &ListFilter) -> Result<Vec<ProductSummary>>;

    /// Links a derived artifact to its record. Returns `false` when the reference was
    /// already attached (redelivered work item) and nothing changed.
    async fn attach_derived(&self, id: ProductId, reference: String) -> Result<bool>;
}

/// In-process store backed by a `DashMap`.
pub struct MemoryProductStore {
    records: Arc<DashMap<ProductId, Product>>,
    next_id: AtomicU64,
}

impl MemoryProductStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MemoryProductStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProductStore for MemoryProductStore {
    async fn insert(&self, product: NewProduct) -> Result<ProductId> {
        let id = ProductId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.records.insert(id, Product::from_new(id, product));

        tracing::debug!("Inserted product {}", id);
        Ok(id)
    }

    async fn get_by_id(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.records.get(&id).map(|entry| entry.value().clone()))
    }

    async fn query(&self, filter: &ListFilter) -> Result<Vec<ProductSummary>> {
        let mut rows: Vec<ProductSummary> = self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().summary())
            .collect();

        rows.sort_by_key(|row| row.id);
        Ok(rows)
    }

    async fn attach_derived(&self, id: ProductId, reference: String) -> Result<bool> {
        let Some(mut entry) = self.records.get_mut(&id) else {
            return Err(crate::error::CatalogError::NotFound(id.0));
        };

        if entry.derived_images.contains(&reference) {
            return Ok(false);
        }

        // Artifact names are zero-padded by image index, so lexical order is submission order.
        entry.derived_images.push(reference);
        entry.derived_images.sort();
        Ok(true)
    }
}
