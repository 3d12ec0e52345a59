use anyhow::Context;
use clap::Parser;
use product_catalog::api;
use product_catalog::cache::LookupCache;
use product_catalog::cache::memory::MemoryCache;
use product_catalog::cache::redis::RedisCache;
use product_catalog::catalog::store::{MemoryProductStore, ProductStore};
use product_catalog::config::{Backend, Cli, Settings};
use product_catalog::ingestion::pipeline::IngestionPipeline;
use product_catalog::processing::processor::ImageProcessor;
use product_catalog::processing::sink::FileSystemSink;
use product_catalog::processing::source::HttpImageSource;
use product_catalog::processing::worker::WorkerPool;
use product_catalog::queue::WorkQueue;
use product_catalog::queue::memory::MemoryWorkQueue;
use product_catalog::queue::redis::RedisWorkQueue;
use product_catalog::retrieval::service::RetrievalService;
use product_catalog::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli)?;
    telemetry::init(&settings.logging)?;

    let bind_addr = settings.bind_addr()?;
    tracing::info!("Starting product catalog on {}", bind_addr);

    // 1. Backends:
    let store: Arc<dyn ProductStore> = Arc::new(MemoryProductStore::new());
    let cache = build_cache(&settings).await?;
    let (queue, local_queue) = build_queue(&settings).await?;

    if let Err(e) = queue.declare(&settings.queue.channel).await {
        // Workers keep retrying their subscription until the channel exists.
        tracing::error!("Failed to declare queue {}: {}", settings.queue.channel, e);
    }

    // 2. Core services:
    let pipeline = Arc::new(IngestionPipeline::new(
        store.clone(),
        cache.clone(),
        queue.clone(),
        settings.pipeline_settings(),
    ));
    let retrieval = Arc::new(RetrievalService::new(
        store.clone(),
        cache.clone(),
        settings.retrieval_settings(),
    ));

    // 3. Image workers:
    let source = Arc::new(HttpImageSource::new(
        settings.fetch_timeout(),
        settings.processing.max_image_bytes,
    )?);
    let sink = Arc::new(FileSystemSink::new(settings.processing.output_dir.clone()));
    let processor = Arc::new(ImageProcessor::new(
        source,
        sink,
        store.clone(),
        cache.clone(),
        settings.processor_settings(),
    ));

    let consumer_prefix = settings.consumer_id();
    tracing::info!("Consuming {} as {}", settings.queue.channel, consumer_prefix);
    let workers = WorkerPool::new(queue.clone(), processor, settings.worker_settings(consumer_prefix));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handles = workers.start(shutdown_rx.clone());

    // 4. Spawn stats reporter:
    let stats = workers.stats();
    let channel = settings.queue.channel.clone();
    let mut stats_shutdown = shutdown_rx;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            tokio::select! {
                _ = stats_shutdown.changed() => break,
                _ = interval.tick() => {}
            }

            let snapshot = stats.snapshot();
            tracing::info!(
                "Worker stats: {} completed, {} requeued, {} dropped",
                snapshot.completed,
                snapshot.requeued,
                snapshot.dropped
            );
            if let Some(queue) = &local_queue {
                let (pending, in_flight) = queue.depth(&channel);
                tracing::info!("Queue {}: {} pending, {} in flight", channel, pending, in_flight);
            }
        }
    });

    // 5. Start HTTP server:
    let app = api::router(pipeline, retrieval);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("HTTP server listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 6. Drain workers:
    tracing::info!("Shutting down image workers");
    let _ = shutdown_tx.send(true);
    for handle in worker_handles {
        if let Err(e) = handle.await {
            tracing::warn!("Worker exited abnormally: {}", e);
        }
    }

    Ok(())
}

async fn build_cache(settings: &Settings) -> anyhow::Result<Arc<dyn LookupCache>> {
    match settings.cache.backend {
        Backend::Memory => Ok(Arc::new(MemoryCache::new())),
        Backend::Redis => {
            let url = settings
                .cache
                .redis_url
                .as_deref()
                .context("cache.redis_url is not set")?;
            let cache = RedisCache::connect(url)
                .await
                .with_context(|| format!("cannot reach cache at {}", url))?;
            tracing::info!("Using Redis cache at {}", url);
            Ok(Arc::new(cache))
        }
    }
}

/// Returns the queue plus, for the in-process backend, a handle used for depth reporting.
async fn build_queue(
    settings: &Settings,
) -> anyhow::Result<(Arc<dyn WorkQueue>, Option<Arc<MemoryWorkQueue>>)> {
    match settings.queue.backend {
        Backend::Memory => {
            let queue = Arc::new(MemoryWorkQueue::new(settings.lease()));
            let shared: Arc<dyn WorkQueue> = queue.clone();
            Ok((shared, Some(queue)))
        }
        Backend::Redis => {
            let url = settings
                .queue
                .redis_url
                .as_deref()
                .context("queue.redis_url is not set")?;
            let queue = RedisWorkQueue::connect(url, &settings.queue.key_prefix, settings.lease())
                .await
                .with_context(|| format!("cannot reach queue at {}", url))?;
            tracing::info!("Using Redis queue at {}", url);
            let shared: Arc<dyn WorkQueue> = Arc::new(queue);
            Ok((shared, None))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("Shutdown signal received");
}
