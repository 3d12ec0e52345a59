//! Product Catalog Library
//!
//! Product records with cache-aside reads and queue-driven image processing. This crate
//! holds the core; `main.rs` wires it to configuration, backends and the HTTP server.
//!
//! ## Architecture Modules
//! - **`catalog`**: the Product Record, its identifier and the authoritative store.
//! - **`cache`**: the fast lookup cache (in-memory or Redis) holding record snapshots.
//! - **`queue`**: the at-least-once work queue (in-memory leases or Redis reliable lists).
//! - **`ingestion`**: validates and persists new products, then fans their images out as
//!   work items in the background.
//! - **`processing`**: the worker pool that fetches, resizes and stores derived images.
//! - **`retrieval`**: cache-aside lookup by id and filtered listing.
//! - **`api`**: the axum HTTP surface over ingestion and retrieval.
//! - **`config`** / **`telemetry`**: layered settings and tracing setup for the binary.
//! - **`error`**: the shared error taxonomy.

pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod processing;
pub mod queue;
pub mod retrieval;
pub mod telemetry;
