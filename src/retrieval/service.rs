use super::cache_key;
use crate::cache::LookupCache;
use crate::catalog::store::ProductStore;
use crate::catalog::types::{ListFilter, Product, ProductId, ProductSummary};
use crate::error::{CatalogError, Result, with_timeout};

use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub store_timeout: Duration,
    pub cache_timeout: Duration,
    /// Expiry of entries filled after a miss. `None` keeps them until overwritten.
    pub cache_ttl: Option<Duration>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(2),
            cache_timeout: Duration::from_millis(500),
            cache_ttl: None,
        }
    }
}

#[derive(Clone)]
pub struct RetrievalService {
    store: Arc<dyn ProductStore>,
    cache: Arc<dyn LookupCache>,
    settings: RetrievalSettings,
}

impl RetrievalService {
    pub fn new(
        store: Arc<dyn ProductStore>,
        cache: Arc<dyn LookupCache>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            store,
            cache,
            settings,
        }
    }

    /// Cache-aside lookup. `Ok(None)` means the product does not exist.
    pub async fn get(&self, id: ProductId) -> Result<Option<Product>> {
        let key = cache_key(id);

        if let Some(product) = self.from_cache(&key).await {
            tracing::debug!("Cache hit for product {}", id);
            return Ok(Some(product));
        }

        let product = match with_timeout(self.settings.store_timeout, self.store.get_by_id(id)).await {
            Ok(Some(product)) => product,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::error!("Failed to read product {} from store: {}", id, e);
                return Err(e);
            }
        };

        self.fill(&key, &product).await;
        Ok(Some(product))
    }

    /// Filtered listing straight from the store.
    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<ProductSummary>> {
        if let (Some(min), Some(max)) = (filter.min_price, filter.max_price)
            && min > max
        {
            return Err(CatalogError::Validation(format!(
                "min_price {} is greater than max_price {}",
                min, max
            )));
        }

        with_timeout(self.settings.store_timeout, self.store.query(filter)).await
    }

    /// Any failure here is a miss.
    async fn from_cache(&self, key: &str) -> Option<Product> {
        let raw = match with_timeout(self.settings.cache_timeout, self.cache.get(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Cache lookup for {} failed, reading store: {}", key, e);
                return None;
            }
        };

        match serde_json::from_slice::<Product>(&raw) {
            Ok(product) => Some(product),
            Err(e) => {
                tracing::warn!("Discarding corrupt cache entry {}: {}", key, e);
                if let Err(e) = with_timeout(self.settings.cache_timeout, self.cache.delete(key)).await {
                    tracing::warn!("Failed to evict corrupt cache entry {}: {}", key, e);
                }
                None
            }
        }
    }

    /// Never overwrites: a snapshot written meanwhile (e.g. after derived images were
    /// linked) is newer than what this read saw.
    async fn fill(&self, key: &str, product: &Product) {
        let snapshot = match serde_json::to_vec(product) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Failed to serialize product {}: {}", product.id, e);
                return;
            }
        };

        match with_timeout(
            self.settings.cache_timeout,
            self.cache.set_if_absent(key, snapshot, self.settings.cache_ttl),
        )
        .await
        {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Cache entry {} was filled concurrently, keeping it", key),
            Err(e) => tracing::warn!("Failed to populate cache entry {}: {}", key, e),
        }
    }
}
