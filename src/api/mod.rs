//! HTTP API
//!
//! Thin axum layer over the ingestion pipeline and the retrieval service.
//!
//! ## Endpoints
//! - `POST /products`: create a product; its images are processed in the background.
//! - `GET /products/:id`: single product, served cache-aside.
//! - `GET /products?user_id=&min_price=&max_price=&product_name=`: an owner's products.
//!
//! Errors are returned as `{"error": "..."}` with a 400, 404 or 500 status.

pub mod handlers;
pub mod protocol;

use crate::ingestion::pipeline::IngestionPipeline;
use crate::retrieval::service::RetrievalService;

use axum::{Extension, Router, routing::get};
use std::sync::Arc;

pub fn router(pipeline: Arc<IngestionPipeline>, retrieval: Arc<RetrievalService>) -> Router {
    Router::new()
        .route(
            protocol::ENDPOINT_PRODUCTS,
            get(handlers::handle_list_products).post(handlers::handle_create_product),
        )
        .route(protocol::ENDPOINT_PRODUCT, get(handlers::handle_get_product))
        .layer(Extension(pipeline))
        .layer(Extension(retrieval))
}

#[cfg(test)]
mod tests;
