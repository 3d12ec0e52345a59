//! Product Catalog Module
//!
//! Owns the Product Record and the authoritative store it lives in.
//!
//! ## Core Concepts
//! - **Product Record**: owner, name, description, price and the ordered original image
//!   references. Derived image references are attached later by the processing workers.
//! - **Identifier**: assigned by the store on insert, positive, never reused.
//! - **Store**: `ProductStore` is the seam to the authoritative storage. `MemoryProductStore`
//!   is the in-process implementation; it provides its own concurrency safety so callers
//!   never lock around it.

pub mod store;
pub mod types;
