//! Retrieval Module
//!
//! Read path of the catalog.
//!
//! - **`get`** implements cache-aside: cache first, authoritative store on a miss, then a
//!   best-effort cache fill. A corrupt or unreachable cache degrades to a store read and is
//!   never reported to the caller.
//! - **`list`** always reads the store; listings are not cached.
//!
//! Concurrent misses on the same id may both read the store and both fill the cache.
//! Without a mutation in between both writes carry the same snapshot, so the last one wins
//! harmlessly.

pub mod service;

use crate::catalog::types::ProductId;

/// Cache key holding the serialized snapshot of a product.
pub fn cache_key(id: ProductId) -> String {
    format!("product:{}", id)
}
