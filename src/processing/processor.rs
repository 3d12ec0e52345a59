use super::sink::ArtifactSink;
use super::source::ImageSource;
use super::transform::{CANONICAL_WIDTH, render_derived};
use crate::cache::LookupCache;
use crate::catalog::types::ProductId;
use crate::catalog::store::ProductStore;
use crate::error::{CatalogError, Result, with_timeout};
use crate::queue::types::WorkItem;
use crate::retrieval::cache_key;

use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub max_width: u32,
    pub jpeg_quality: u8,
    /// Record artifact locations on the Product Record once written.
    pub link_derived: bool,
    pub store_timeout: Duration,
    pub cache_timeout: Duration,
    pub cache_ttl: Option<Duration>,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            max_width: CANONICAL_WIDTH,
            jpeg_quality: 85,
            link_derived: true,
            store_timeout: Duration::from_secs(2),
            cache_timeout: Duration::from_millis(500),
            cache_ttl: None,
        }
    }
}

/// Runs a single work item from fetch to persisted artifact.
pub struct ImageProcessor {
    source: Arc<dyn ImageSource>,
    sink: Arc<dyn ArtifactSink>,
    store: Arc<dyn ProductStore>,
    cache: Arc<dyn LookupCache>,
    settings: ProcessorSettings,
}

impl ImageProcessor {
    pub fn new(
        source: Arc<dyn ImageSource>,
        sink: Arc<dyn ArtifactSink>,
        store: Arc<dyn ProductStore>,
        cache: Arc<dyn LookupCache>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            source,
            sink,
            store,
            cache,
            settings,
        }
    }

    /// Fetch, resize, persist and optionally link. Returns the artifact location.
    ///
    /// Safe to repeat for the same item: the artifact is overwritten and linking is idempotent.
    pub async fn process(&self, item: &WorkItem) -> Result<String> {
        let original = self.source.fetch(&item.image_url).await?;

        let max_width = self.settings.max_width;
        let quality = self.settings.jpeg_quality;
        let derived = tokio::task::spawn_blocking(move || render_derived(&original, max_width, quality))
            .await
            .map_err(|e| CatalogError::TransientIo(format!("transform task failed: {}", e)))??;

        let location = self.sink.persist(item, derived).await?;
        tracing::debug!(
            "Stored derived image {} for product {} at {}",
            item.image_index,
            item.product_id,
            location
        );

        if self.settings.link_derived {
            self.link(item, &location).await?;
        }

        Ok(location)
    }

    async fn link(&self, item: &WorkItem, location: &str) -> Result<()> {
        let attached = with_timeout(
            self.settings.store_timeout,
            self.store.attach_derived(item.product_id, location.to_string()),
        )
        .await?;

        if !attached {
            tracing::trace!("Product {} already references {}", item.product_id, location);
            return Ok(());
        }

        self.refresh_cached(item.product_id).await;
        Ok(())
    }

    /// Overwrites the cached snapshot with the linked record. Readers only fill absent
    /// entries, so a fill racing with this write cannot reinstate the older record.
    async fn refresh_cached(&self, id: ProductId) {
        let key = cache_key(id);
        let snapshot = match with_timeout(self.settings.store_timeout, self.store.get_by_id(id)).await {
            Ok(Some(product)) => serde_json::to_vec(&product).map_err(|e| CatalogError::CorruptData(e.to_string())),
            Ok(None) => Err(CatalogError::NotFound(id.0)),
            Err(e) => Err(e),
        };

        let written = match snapshot {
            Ok(snapshot) => {
                with_timeout(
                    self.settings.cache_timeout,
                    self.cache.set(&key, snapshot, self.settings.cache_ttl),
                )
                .await
            }
            Err(e) => {
                tracing::debug!("Falling back to invalidating {}: {}", key, e);
                with_timeout(self.settings.cache_timeout, self.cache.delete(&key)).await
            }
        };

        if let Err(e) = written {
            tracing::warn!("Failed to refresh cache entry {}: {}", key, e);
        }
    }
}
