//! Worker Pool Implementation
//!
//! Spawns the background workers that pull image work items from the queue.
//!
//! ## Responsibilities
//! - **Subscribing**: one subscription per worker, retried with backoff until the queue answers.
//! - **Lease Management**: a sidecar task renews the delivery lease while an item is processed.
//! - **Settlement**: ack on success or permanent failure, nack transient failures until the
//!   attempt budget is spent.

use super::processor::ImageProcessor;
use crate::error::{CatalogError, with_timeout};
use crate::queue::types::{Delivery, DeliveryTag};
use crate::queue::{Subscription, WorkQueue};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub channel: String,
    /// Workers subscribe as `<consumer_prefix>-<n>`.
    pub consumer_prefix: String,
    pub worker_count: usize,
    /// Total deliveries an item may get before a transient failure drops it.
    pub max_attempts: u32,
    pub renew_interval: Duration,
    /// Deadline for each subscribe, ack, nack and renew call.
    pub queue_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            channel: crate::queue::DEFAULT_CHANNEL.to_string(),
            consumer_prefix: "worker".to_string(),
            worker_count: 4,
            max_attempts: 3,
            renew_interval: Duration::from_secs(10),
            queue_timeout: Duration::from_secs(2),
        }
    }
}

/// How a single delivery was settled.
#[derive(Debug)]
pub enum Outcome {
    Completed(String),
    Requeued(CatalogError),
    Dropped(CatalogError),
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    completed: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub completed: u64,
    pub requeued: u64,
    pub dropped: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Completed(_) => &self.completed,
            Outcome::Requeued(_) => &self.requeued,
            Outcome::Dropped(_) => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The engine that drives image processing.
pub struct WorkerPool {
    queue: Arc<dyn WorkQueue>,
    processor: Arc<ImageProcessor>,
    settings: WorkerSettings,
    stats: Arc<WorkerStats>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        processor: Arc<ImageProcessor>,
        settings: WorkerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            processor,
            settings,
            stats: Arc::new(WorkerStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Spawns the workers and returns their handles. Workers exit once `shutdown` flips to
    /// `true` (or its sender is dropped), finishing the item they hold first.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        tracing::info!(
            "Starting {} image workers on channel {}",
            self.settings.worker_count,
            self.settings.channel
        );

        (0..self.settings.worker_count)
            .map(|worker_id| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    pool.worker_loop(worker_id, shutdown).await;
                })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        let consumer = format!("{}-{}", self.settings.consumer_prefix, worker_id);
        let mut failures = 0u32;

        let subscription = loop {
            if *shutdown.borrow() {
                return;
            }
            let subscribe = self.queue.subscribe(&self.settings.channel, &consumer);
            match with_timeout(self.settings.queue_timeout, subscribe).await {
                Ok(subscription) => break subscription,
                Err(e) => {
                    failures += 1;
                    tracing::warn!("Worker {} cannot subscribe to {}: {}", worker_id, self.settings.channel, e);
                    if !pause(backoff(failures), &mut shutdown).await {
                        return;
                    }
                }
            }
        };

        tracing::info!("Worker {} started as {}", worker_id, consumer);
        failures = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                _ = shutdown.changed() => break,
                next = subscription.next() => next,
            };

            match next {
                Ok(delivery) => {
                    failures = 0;
                    self.handle(&subscription, delivery).await;
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!("Worker {} failed to receive work: {}", worker_id, e);
                    if !pause(backoff(failures), &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        tracing::info!("Worker {} stopped", worker_id);
    }

    /// Processes one delivery under a renewed lease and settles it.
    pub async fn handle(&self, subscription: &Arc<dyn Subscription>, delivery: Delivery) -> Outcome {
        let Delivery { tag, item } = delivery;
        tracing::debug!(
            "Processing image {} of product {} (attempt {})",
            item.image_index,
            item.product_id,
            item.attempt
        );

        let renewal_handle = self.spawn_lease_renewal(subscription.clone(), tag.clone());

        // A panic inside processing surfaces as a JoinError instead of killing the worker.
        let processor = self.processor.clone();
        let job = item.clone();
        let result = match tokio::spawn(async move { processor.process(&job).await }).await {
            Ok(result) => result,
            Err(e) => Err(CatalogError::TransientIo(format!("processing task aborted: {}", e))),
        };

        renewal_handle.abort();

        let outcome = match result {
            Ok(location) => Outcome::Completed(location),
            Err(e) if e.is_transient() && item.attempt.saturating_add(1) < self.settings.max_attempts => {
                Outcome::Requeued(e)
            }
            Err(e) => Outcome::Dropped(e),
        };

        let settled = match &outcome {
            Outcome::Completed(location) => {
                tracing::info!("Processed image {} of product {} -> {}", item.image_index, item.product_id, location);
                with_timeout(self.settings.queue_timeout, subscription.ack(&tag)).await
            }
            Outcome::Requeued(e) => {
                tracing::warn!(
                    "Retrying image {} of product {} after attempt {}: {}",
                    item.image_index,
                    item.product_id,
                    item.attempt,
                    e
                );
                let delivery = Delivery { tag: tag.clone(), item: item.clone() };
                with_timeout(self.settings.queue_timeout, subscription.nack(&delivery)).await
            }
            Outcome::Dropped(e) => {
                tracing::error!(
                    "Dropping image {} of product {} ({}) after attempt {}: {}",
                    item.image_index,
                    item.product_id,
                    item.image_url,
                    item.attempt,
                    e
                );
                with_timeout(self.settings.queue_timeout, subscription.ack(&tag)).await
            }
        };

        if let Err(e) = settled {
            tracing::error!("Failed to settle delivery {}: {}", tag.0, e);
        }

        self.stats.record(&outcome);
        outcome
    }

    /// Keeps the lease alive while the item is processed. Stops on the first failed renewal.
    fn spawn_lease_renewal(&self, subscription: Arc<dyn Subscription>, tag: DeliveryTag) -> JoinHandle<()> {
        let interval = self.settings.renew_interval;
        let deadline = self.settings.queue_timeout;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                match with_timeout(deadline, subscription.renew(&tag)).await {
                    Ok(_) => {
                        tracing::trace!("Renewed lease for delivery {}", tag.0);
                    }
                    Err(_) => {
                        tracing::trace!("Delivery {} no longer needs lease renewal", tag.0);
                        break;
                    }
                }
            }
        })
    }
}

/// Exponential backoff with jitter, capped at 5 seconds.
fn backoff(failures: u32) -> Duration {
    let exp = 100u64.saturating_mul(1 << failures.min(6));
    let jitter = rand::random::<u64>() % 50;
    Duration::from_millis(exp.min(5_000) + jitter)
}

/// Sleeps for `delay`; returns false if shutdown was requested meanwhile.
async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = shutdown.changed() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
