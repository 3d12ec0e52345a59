//! Wire format of the public API.
//!
//! Field names match the ones existing clients already send and read.

use crate::catalog::types::{NewProduct, Product, ProductId, ProductSummary};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

pub const ENDPOINT_PRODUCTS: &str = "/products";
pub const ENDPOINT_PRODUCT: &str = "/products/:id";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateProductRequest {
    pub user_id: u64,
    pub product_name: String,
    #[serde(default)]
    pub product_description: String,
    #[serde(default)]
    pub product_images: Vec<String>,
    /// Accepts a JSON number or a decimal string.
    pub product_price: Decimal,
}

impl From<CreateProductRequest> for NewProduct {
    fn from(req: CreateProductRequest) -> Self {
        NewProduct {
            owner_id: req.user_id,
            name: req.product_name,
            description: req.product_description,
            price: req.product_price,
            images: req.product_images,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateProductResponse {
    pub product_id: ProductId,
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: ProductId,
    pub user_id: u64,
    pub product_name: String,
    pub product_description: String,
    pub product_images: Vec<String>,
    pub compressed_product_images: Vec<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub product_price: Decimal,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            user_id: product.owner_id,
            product_name: product.name,
            product_description: product.description,
            product_images: product.images,
            compressed_product_images: product.derived_images,
            product_price: product.price,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProductSummaryResponse {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

impl From<ProductSummary> for ProductSummaryResponse {
    fn from(summary: ProductSummary) -> Self {
        Self {
            id: summary.id,
            name: summary.name,
            description: summary.description,
            price: summary.price,
        }
    }
}

/// Raw listing query. Values are parsed by the handler so malformed input maps to a 400.
#[derive(Debug, Default, Deserialize)]
pub struct ListProductsQuery {
    pub user_id: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub product_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
