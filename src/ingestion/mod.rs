//! Ingestion Pipeline Module
//!
//! Accepts product submissions and fans their image references out to the work queue.
//!
//! ## Workflow
//! 1. **Validate**: reject malformed submissions before anything durable happens.
//! 2. **Persist**: insert the record into the authoritative store and obtain its id.
//! 3. **Dispatch** (background): write the new record through to the cache, declare the
//!    channel and publish one `WorkItem` per image reference. Every publish is attempted
//!    independently; failures are logged and reported, never surfaced to the submitter,
//!    because the record already exists.
//!
//! The dispatch step runs on its own task and is handed back as a `JoinHandle` so tests
//! can observe it. Production callers drop the handle; the task keeps running regardless
//! of what happens to the request that triggered it.

pub mod pipeline;
pub mod types;
