use super::protocol::*;
use crate::catalog::types::{ListFilter, NewProduct, ProductId};
use crate::error::CatalogError;
use crate::ingestion::pipeline::IngestionPipeline;
use crate::retrieval::service::RetrievalService;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: message.into() })).into_response()
}

pub async fn handle_create_product(
    Extension(pipeline): Extension<Arc<IngestionPipeline>>,
    payload: Result<Json<CreateProductRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Invalid product data: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "Invalid product data");
        }
    };

    let new = NewProduct::from(req);

    // Runs detached from the request so a client hang-up cannot cut the insert short.
    let submitted = tokio::spawn(async move { pipeline.submit(new).await.map(|s| s.id) }).await;

    match submitted {
        Ok(Ok(product_id)) => (StatusCode::CREATED, Json(CreateProductResponse { product_id })).into_response(),
        Ok(Err(CatalogError::Validation(message))) => {
            tracing::error!("Rejected product: {}", message);
            error_response(StatusCode::BAD_REQUEST, message)
        }
        Ok(Err(e)) => {
            tracing::error!("Failed to insert product: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create product")
        }
        Err(e) => {
            tracing::error!("Product submission task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create product")
        }
    }
}

pub async fn handle_get_product(
    Extension(retrieval): Extension<Arc<RetrievalService>>,
    Path(raw_id): Path<String>,
) -> Response {
    let id: ProductId = match raw_id.parse() {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("Failed to parse product id {:?}: {}", raw_id, e);
            return error_response(StatusCode::BAD_REQUEST, "Invalid product id");
        }
    };

    match retrieval.get(id).await {
        Ok(Some(product)) => (StatusCode::OK, Json(ProductResponse::from(product))).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Product not found"),
        Err(e) => {
            tracing::error!("Failed to retrieve product {}: {}", id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve product")
        }
    }
}

pub async fn handle_list_products(
    Extension(retrieval): Extension<Arc<RetrievalService>>,
    query: Result<Query<ListProductsQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(e) => {
            tracing::error!("Invalid listing query: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "Invalid query");
        }
    };

    let filter = match parse_filter(query) {
        Ok(filter) => filter,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    match retrieval.list(&filter).await {
        Ok(summaries) => {
            let body: Vec<ProductSummaryResponse> = summaries.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(CatalogError::Validation(message)) => error_response(StatusCode::BAD_REQUEST, message),
        Err(e) => {
            tracing::error!("Failed to list products for owner {}: {}", filter.owner_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve products")
        }
    }
}

fn parse_filter(query: ListProductsQuery) -> Result<ListFilter, String> {
    let owner_id = match non_empty(query.user_id) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("invalid user_id: {}", raw))?,
        None => return Err("user_id is required".to_string()),
    };

    Ok(ListFilter {
        owner_id,
        min_price: parse_price("min_price", query.min_price)?,
        max_price: parse_price("max_price", query.max_price)?,
        name_contains: non_empty(query.product_name),
    })
}

fn parse_price(name: &str, raw: Option<String>) -> Result<Option<Decimal>, String> {
    non_empty(raw)
        .map(|value| Decimal::from_str(value.trim()).map_err(|_| format!("invalid {}: {}", name, value)))
        .transpose()
}

/// Empty query values count as absent.
fn non_empty(raw: Option<String>) -> Option<String> {
    raw.filter(|value| !value.trim().is_empty())
}
