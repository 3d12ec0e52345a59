//! Queue Module Tests
//!
//! ## Test Scopes
//! - **Declaration**: idempotency, publishing to undeclared channels.
//! - **Delivery**: FIFO order, exclusive ownership, competing subscriptions.
//! - **Settlement**: ack removes, nack redelivers with a bumped attempt counter, stale tags.
//! - **Leases**: abandoned in-flight items come back after the lease expires.
//! - **Redis keys / payloads**: pure helpers of the Redis adapter.

#[cfg(test)]
mod tests {
    use crate::catalog::types::ProductId;
    use crate::error::CatalogError;
    use crate::queue::memory::MemoryWorkQueue;
    use crate::queue::redis::{
        channel_key, consumers_key, heartbeat_key, orphaned_consumers, processing_key, registry_key,
    };
    use crate::queue::types::{DeliveryTag, WorkItem};
    use crate::queue::{DEFAULT_CHANNEL, WorkQueue};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn item(product: u64, index: usize) -> WorkItem {
        WorkItem::new(ProductId(product), index, format!("http://x/{}-{}.jpg", product, index))
    }

    async fn declared_queue(lease: Duration) -> MemoryWorkQueue {
        let queue = MemoryWorkQueue::new(lease);
        queue.declare(DEFAULT_CHANNEL).await.unwrap();
        queue
    }

    // ============================================================
    // DECLARATION
    // ============================================================

    #[tokio::test]
    async fn test_declare_is_idempotent() {
        let queue = MemoryWorkQueue::new(Duration::from_secs(30));

        queue.declare(DEFAULT_CHANNEL).await.unwrap();
        queue.publish(DEFAULT_CHANNEL, &item(1, 0)).await.unwrap();
        queue.declare(DEFAULT_CHANNEL).await.unwrap();

        assert_eq!(queue.channel_count(), 1);
        assert_eq!(queue.depth(DEFAULT_CHANNEL), (1, 0), "redeclaring keeps queued items");
    }

    #[tokio::test]
    async fn test_publish_to_undeclared_channel_fails() {
        let queue = MemoryWorkQueue::new(Duration::from_secs(30));
        let result = queue.publish("nope", &item(1, 0)).await;
        assert!(matches!(result, Err(CatalogError::Validation(_))));
    }

    // ============================================================
    // DELIVERY
    // ============================================================

    #[tokio::test]
    async fn test_delivery_is_fifo() {
        let queue = declared_queue(Duration::from_secs(30)).await;
        for i in 0..3 {
            queue.publish(DEFAULT_CHANNEL, &item(1, i)).await.unwrap();
        }
        let sub = queue.subscribe(DEFAULT_CHANNEL, "worker-0").await.unwrap();

        for expected in 0..3 {
            let delivery = sub.next().await.unwrap();
            assert_eq!(delivery.item.image_index, expected);
            sub.ack(&delivery.tag).await.unwrap();
        }

        assert_eq!(queue.depth(DEFAULT_CHANNEL), (0, 0));
    }

    #[tokio::test]
    async fn test_next_waits_for_publish() {
        let queue = Arc::new(declared_queue(Duration::from_secs(30)).await);
        let sub = queue.subscribe(DEFAULT_CHANNEL, "worker-0").await.unwrap();

        let publisher = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            publisher.publish(DEFAULT_CHANNEL, &item(9, 0)).await.unwrap();
        });

        let delivery = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("delivery should arrive")
            .unwrap();
        assert_eq!(delivery.item.product_id, ProductId(9));
    }

    #[tokio::test]
    async fn test_in_flight_item_is_not_delivered_twice() {
        let queue = declared_queue(Duration::from_secs(30)).await;
        queue.publish(DEFAULT_CHANNEL, &item(1, 0)).await.unwrap();
        let first = queue.subscribe(DEFAULT_CHANNEL, "worker-0").await.unwrap();
        let second = queue.subscribe(DEFAULT_CHANNEL, "worker-1").await.unwrap();

        let _held = first.next().await.unwrap();
        let nothing = tokio::time::timeout(Duration::from_millis(250), second.next()).await;

        assert!(nothing.is_err(), "second subscriber must not receive an in-flight item");
        assert_eq!(queue.depth(DEFAULT_CHANNEL), (0, 1));
    }

    #[tokio::test]
    async fn test_competing_subscribers_split_work_without_duplicates() {
        let queue = Arc::new(declared_queue(Duration::from_secs(30)).await);
        for i in 0..40 {
            queue.publish(DEFAULT_CHANNEL, &item(1, i)).await.unwrap();
        }

        let mut handles = Vec::new();
        for worker in 0..4 {
            let sub = queue
                .subscribe(DEFAULT_CHANNEL, &format!("worker-{}", worker))
                .await
                .unwrap();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Ok(Ok(delivery)) =
                    tokio::time::timeout(Duration::from_millis(300), sub.next()).await
                {
                    seen.push(delivery.item.image_index);
                    sub.ack(&delivery.tag).await.unwrap();
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: HashSet<usize> = all.iter().copied().collect();

        assert_eq!(all.len(), 40, "every item delivered exactly once");
        assert_eq!(unique.len(), 40);
    }

    // ============================================================
    // SETTLEMENT
    // ============================================================

    #[tokio::test]
    async fn test_nack_redelivers_with_incremented_attempt() {
        let queue = declared_queue(Duration::from_secs(30)).await;
        queue.publish(DEFAULT_CHANNEL, &item(1, 0)).await.unwrap();
        queue.publish(DEFAULT_CHANNEL, &item(1, 1)).await.unwrap();
        let sub = queue.subscribe(DEFAULT_CHANNEL, "worker-0").await.unwrap();

        let first = sub.next().await.unwrap();
        assert_eq!(first.item.attempt, 0);
        sub.nack(&first).await.unwrap();

        // The retried item goes to the tail, behind index 1.
        let second = sub.next().await.unwrap();
        assert_eq!(second.item.image_index, 1);
        sub.ack(&second.tag).await.unwrap();

        let retried = sub.next().await.unwrap();
        assert_eq!(retried.item.image_index, 0);
        assert_eq!(retried.item.attempt, 1);
    }

    #[tokio::test]
    async fn test_stale_or_malformed_tags() {
        let queue = declared_queue(Duration::from_secs(30)).await;
        queue.publish(DEFAULT_CHANNEL, &item(1, 0)).await.unwrap();
        let sub = queue.subscribe(DEFAULT_CHANNEL, "worker-0").await.unwrap();
        let delivery = sub.next().await.unwrap();

        sub.ack(&delivery.tag).await.unwrap();
        // Second ack of the same delivery is a no-op.
        sub.ack(&delivery.tag).await.unwrap();

        let malformed = sub.ack(&DeliveryTag("garbage".into())).await;
        assert!(matches!(malformed, Err(CatalogError::CorruptData(_))));
    }

    // ============================================================
    // LEASES
    // ============================================================

    #[tokio::test]
    async fn test_expired_lease_makes_item_redeliverable() {
        let queue = declared_queue(Duration::from_millis(50)).await;
        queue.publish(DEFAULT_CHANNEL, &item(3, 0)).await.unwrap();
        let crashed = queue.subscribe(DEFAULT_CHANNEL, "worker-0").await.unwrap();
        let survivor = queue.subscribe(DEFAULT_CHANNEL, "worker-1").await.unwrap();

        // Worker 0 takes the item and never settles it.
        let abandoned = crashed.next().await.unwrap();

        let redelivered = tokio::time::timeout(Duration::from_secs(2), survivor.next())
            .await
            .expect("item should come back after the lease expires")
            .unwrap();
        assert_eq!(redelivered.item.product_id, ProductId(3));
        assert_eq!(redelivered.item.attempt, 1);

        // The late ack from the crashed worker must not remove the survivor's claim.
        crashed.ack(&abandoned.tag).await.unwrap();
        assert_eq!(queue.depth(DEFAULT_CHANNEL), (0, 1));

        survivor.ack(&redelivered.tag).await.unwrap();
        assert_eq!(queue.depth(DEFAULT_CHANNEL), (0, 0));
    }

    #[tokio::test]
    async fn test_renew_keeps_lease_alive() {
        let queue = declared_queue(Duration::from_millis(80)).await;
        queue.publish(DEFAULT_CHANNEL, &item(1, 0)).await.unwrap();
        let holder = queue.subscribe(DEFAULT_CHANNEL, "worker-0").await.unwrap();
        let other = queue.subscribe(DEFAULT_CHANNEL, "worker-1").await.unwrap();

        let delivery = holder.next().await.unwrap();
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            holder.renew(&delivery.tag).await.unwrap();
        }

        let stolen = tokio::time::timeout(Duration::from_millis(40), other.next()).await;
        assert!(stolen.is_err(), "renewed lease must not expire");
    }

    // ============================================================
    // REDIS HELPERS
    // ============================================================

    #[test]
    fn test_redis_key_layout() {
        assert_eq!(registry_key("catalog:"), "catalog:channels");
        assert_eq!(channel_key("catalog:", "image_queue"), "catalog:queue:image_queue");
        assert_eq!(
            processing_key("catalog:", "image_queue", "node-a-0"),
            "catalog:queue:image_queue:processing:node-a-0"
        );
        assert_eq!(consumers_key("catalog:", "image_queue"), "catalog:queue:image_queue:consumers");
        assert_eq!(
            heartbeat_key("catalog:", "image_queue", "node-a-0"),
            "catalog:queue:image_queue:heartbeat:node-a-0"
        );
    }

    #[test]
    fn test_lapsed_consumers_are_orphaned() {
        let registered: Vec<String> = ["node-a-0", "node-a-1", "node-b-0", "node-b-1"]
            .iter()
            .map(|name| name.to_string())
            .collect();
        // node-a-1 was retired (worker count lowered), node-b-* belongs to a live sibling.
        let alive = [true, false, true, true];

        assert_eq!(orphaned_consumers(&registered, &alive, "node-a-0"), vec!["node-a-1".to_string()]);
        // Live siblings sharing the channel are never touched.
        assert!(orphaned_consumers(&registered, &[true; 4], "node-a-0").is_empty());
        // The sweeping consumer never recovers its own list through the sweep.
        assert_eq!(
            orphaned_consumers(&registered, &[false, true, true, true], "node-a-0"),
            Vec::<String>::new()
        );
    }

    #[test]
    fn test_work_item_payload_tolerates_missing_attempt() {
        let raw = br#"{"product_id":4,"image_index":2,"image_url":"http://x/a.jpg"}"#;
        let decoded = WorkItem::decode(raw).unwrap();

        assert_eq!(decoded.product_id, ProductId(4));
        assert_eq!(decoded.attempt, 0);
        assert_eq!(decoded.retried().attempt, 1);
        assert!(WorkItem::decode(b"http://x/a.jpg").is_err());
    }
}
