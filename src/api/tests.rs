//! API Module Tests
//!
//! Every test binds a real server to an ephemeral local port and talks to it with reqwest.
//!
//! ## Test Scopes
//! - **Create**: status codes, validation, background dispatch of image work.
//! - **Get**: found, missing, malformed id, store outage.
//! - **List**: filters, missing owner, malformed and inverted price bounds.

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::cache::memory::MemoryCache;
    use crate::catalog::store::{MemoryProductStore, ProductStore};
    use crate::catalog::types::{ListFilter, NewProduct, Product, ProductId, ProductSummary};
    use crate::error::{CatalogError, Result};
    use crate::ingestion::pipeline::IngestionPipeline;
    use crate::ingestion::types::PipelineSettings;
    use crate::queue::DEFAULT_CHANNEL;
    use crate::queue::memory::MemoryWorkQueue;
    use crate::retrieval::service::{RetrievalService, RetrievalSettings};

    use async_trait::async_trait;
    use reqwest::StatusCode;
    use serde_json::{Value, json};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    struct TestServer {
        addr: SocketAddr,
        queue: Arc<MemoryWorkQueue>,
        client: reqwest::Client,
    }

    impl TestServer {
        fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.addr, path)
        }
    }

    async fn spawn_server(store: Arc<dyn ProductStore>) -> TestServer {
        let cache = Arc::new(MemoryCache::new());
        let queue = Arc::new(MemoryWorkQueue::new(Duration::from_secs(30)));

        let pipeline = Arc::new(IngestionPipeline::new(
            store.clone(),
            cache.clone(),
            queue.clone(),
            PipelineSettings::default(),
        ));
        let retrieval = Arc::new(RetrievalService::new(store, cache, RetrievalSettings::default()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(pipeline, retrieval);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            addr,
            queue,
            client: reqwest::Client::new(),
        }
    }

    async fn create(server: &TestServer, body: Value) -> (StatusCode, Value) {
        let response = server
            .client
            .post(server.url("/products"))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn get_json(server: &TestServer, path: &str) -> (StatusCode, Value) {
        let response = server.client.get(server.url(path)).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    fn lamp(user_id: u64, name: &str, price: f64) -> Value {
        json!({
            "user_id": user_id,
            "product_name": name,
            "product_description": "Desk lamp",
            "product_images": ["http://img.example.com/a.jpg", "http://img.example.com/b.jpg"],
            "product_price": price
        })
    }

    // ==================================================================================
    // CREATE / GET
    // ==================================================================================

    #[tokio::test]
    async fn test_create_then_get() {
        // ARRANGE
        let server = spawn_server(Arc::new(MemoryProductStore::new())).await;

        // ACT
        let (status, created) = create(&server, lamp(1, "Lamp", 19.99)).await;

        // ASSERT
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["product_id"], 1);

        let (status, product) = get_json(&server, "/products/1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(product["user_id"], 1);
        assert_eq!(product["product_name"], "Lamp");
        assert_eq!(product["product_description"], "Desk lamp");
        assert_eq!(product["product_images"].as_array().unwrap().len(), 2);
        assert_eq!(product["compressed_product_images"], json!([]));
        assert_eq!(product["product_price"], 19.99);
    }

    #[tokio::test]
    async fn test_create_publishes_one_item_per_image() {
        let server = spawn_server(Arc::new(MemoryProductStore::new())).await;

        let (status, _) = create(&server, lamp(1, "Lamp", 5.0)).await;
        assert_eq!(status, StatusCode::CREATED);

        // Dispatch runs after the response, so poll for it.
        for _ in 0..100 {
            if server.queue.depth(DEFAULT_CHANNEL) == (2, 0) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected two queued items, got {:?}", server.queue.depth(DEFAULT_CHANNEL));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let server = spawn_server(Arc::new(MemoryProductStore::new())).await;

        let malformed = server
            .client
            .post(server.url("/products"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
        let body: Value = malformed.json().await.unwrap();
        assert_eq!(body["error"], "Invalid product data");

        let (status, _) = create(&server, json!({ "user_id": 1, "product_price": 3 })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = create(&server, lamp(1, "   ", 3.0)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("name"));

        let (status, _) = create(&server, lamp(1, "Lamp", -1.0)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Nothing was stored.
        let (status, _) = get_json(&server, "/products/1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_missing_and_malformed_ids() {
        let server = spawn_server(Arc::new(MemoryProductStore::new())).await;

        let (status, body) = get_json(&server, "/products/999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Product not found");

        let (status, _) = get_json(&server, "/products/abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    /// Store whose every call fails.
    struct DownStore;

    #[async_trait]
    impl ProductStore for DownStore {
        async fn insert(&self, _product: NewProduct) -> Result<ProductId> {
            Err(CatalogError::TransientIo("database down".into()))
        }
        async fn get_by_id(&self, _id: ProductId) -> Result<Option<Product>> {
            Err(CatalogError::TransientIo("database down".into()))
        }
        async fn query(&self, _filter: &ListFilter) -> Result<Vec<ProductSummary>> {
            Err(CatalogError::TransientIo("database down".into()))
        }
        async fn attach_derived(&self, _id: ProductId, _reference: String) -> Result<bool> {
            Err(CatalogError::TransientIo("database down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_outage_maps_to_500() {
        let server = spawn_server(Arc::new(DownStore)).await;

        let (status, body) = create(&server, lamp(1, "Lamp", 1.0)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to create product");

        let (status, _) = get_json(&server, "/products/1").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, _) = get_json(&server, "/products?user_id=1").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        // No image work for a product that was never stored.
        assert_eq!(server.queue.depth(DEFAULT_CHANNEL), (0, 0));
    }

    // ==================================================================================
    // LIST
    // ==================================================================================

    #[tokio::test]
    async fn test_list_filters() {
        // ARRANGE
        let server = spawn_server(Arc::new(MemoryProductStore::new())).await;
        for (user, name, price) in [(1, "Red Lamp", 10.0), (1, "Blue Lamp", 30.0), (1, "Chair", 20.0), (2, "Red Lamp", 15.0)] {
            let (status, _) = create(&server, lamp(user, name, price)).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        // ACT
        let (status, all) = get_json(&server, "/products?user_id=1").await;
        let (_, lamps) = get_json(&server, "/products?user_id=1&product_name=lamp").await;
        let (_, cheap) = get_json(&server, "/products?user_id=1&max_price=20").await;
        let (_, ranged) = get_json(&server, "/products?user_id=1&min_price=15&max_price=25&product_name=").await;

        // ASSERT
        assert_eq!(status, StatusCode::OK);
        let ids = |body: &Value| -> Vec<u64> {
            body.as_array().unwrap().iter().map(|p| p["id"].as_u64().unwrap()).collect()
        };
        assert_eq!(ids(&all), vec![1, 2, 3]);
        assert_eq!(ids(&lamps), vec![1, 2]);
        assert_eq!(ids(&cheap), vec![1, 3]);
        assert_eq!(ids(&ranged), vec![3]);

        let first = &all[0];
        assert_eq!(first["name"], "Red Lamp");
        assert_eq!(first["description"], "Desk lamp");
        assert_eq!(first["price"], 10.0);
    }

    #[tokio::test]
    async fn test_list_rejects_bad_query() {
        let server = spawn_server(Arc::new(MemoryProductStore::new())).await;

        let (status, body) = get_json(&server, "/products").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "user_id is required");

        let (status, _) = get_json(&server, "/products?user_id=me").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_json(&server, "/products?user_id=1&min_price=cheap").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_json(&server, "/products?user_id=1&min_price=50&max_price=10").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_unknown_owner_is_empty() {
        let server = spawn_server(Arc::new(MemoryProductStore::new())).await;

        let (status, body) = get_json(&server, "/products?user_id=42").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }
}
