use super::types::*;
use crate::cache::LookupCache;
use crate::catalog::store::ProductStore;
use crate::catalog::types::{NewProduct, Product};
use crate::error::{CatalogError, Result, with_timeout};
use crate::queue::WorkQueue;
use crate::queue::types::WorkItem;
use crate::retrieval::cache_key;

use rust_decimal::Decimal;
use std::sync::Arc;

#[derive(Clone)]
pub struct IngestionPipeline {
    store: Arc<dyn ProductStore>,
    cache: Arc<dyn LookupCache>,
    queue: Arc<dyn WorkQueue>,
    settings: PipelineSettings,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn ProductStore>,
        cache: Arc<dyn LookupCache>,
        queue: Arc<dyn WorkQueue>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            cache,
            queue,
            settings,
        }
    }

    /// Persists `new` and schedules its image work items.
    ///
    /// Returns once the record is durable; queue traffic happens on the returned
    /// `dispatch` task and cannot fail the submission.
    pub async fn submit(&self, new: NewProduct) -> Result<Submission> {
        validate(&new)?;

        let id = with_timeout(self.settings.store_timeout, self.store.insert(new.clone())).await?;
        tracing::info!(
            "Created product {} for owner {} with {} image(s)",
            id,
            new.owner_id,
            new.images.len()
        );

        let product = Product::from_new(id, new);
        let pipeline = self.clone();
        let dispatch = tokio::spawn(async move { pipeline.dispatch(product).await });

        Ok(Submission { id, dispatch })
    }

    async fn dispatch(&self, product: Product) -> DispatchReport {
        let mut report = DispatchReport::new(product.id);
        report.cached = self.write_through(&product).await;

        if product.images.is_empty() {
            return report;
        }

        let channel = &self.settings.channel;
        if let Err(e) = with_timeout(self.settings.queue_timeout, self.queue.declare(channel)).await {
            // Keep going: each publish reports its own failure.
            tracing::error!("Failed to declare queue {}: {}", channel, e);
        }

        for (index, url) in product.images.iter().enumerate() {
            let item = WorkItem::new(product.id, index, url.clone());
            report.attempted += 1;

            match with_timeout(self.settings.queue_timeout, self.queue.publish(channel, &item)).await {
                Ok(()) => {
                    report.published += 1;
                    tracing::info!("Image URL enqueued successfully: {}", url);
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to publish image {} of product {}: {}",
                        index,
                        product.id,
                        e
                    );
                    report.failures.push(PublishFailure {
                        image_index: index,
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    async fn write_through(&self, product: &Product) -> bool {
        let snapshot = match serde_json::to_vec(product) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Failed to serialize product {}: {}", product.id, e);
                return false;
            }
        };

        let key = cache_key(product.id);
        match with_timeout(
            self.settings.cache_timeout,
            self.cache.set(&key, snapshot, self.settings.cache_ttl),
        )
        .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to cache new product {}: {}", product.id, e);
                false
            }
        }
    }
}

/// Rejects submissions that must never reach the store.
pub fn validate(new: &NewProduct) -> Result<()> {
    if new.name.trim().is_empty() {
        return Err(CatalogError::Validation("product name must not be empty".to_string()));
    }
    if new.price < Decimal::ZERO {
        return Err(CatalogError::Validation(format!(
            "product price must be non-negative, got {}",
            new.price
        )));
    }
    if let Some(index) = new.images.iter().position(|url| url.trim().is_empty()) {
        return Err(CatalogError::Validation(format!("image reference {} is blank", index)));
    }
    Ok(())
}
