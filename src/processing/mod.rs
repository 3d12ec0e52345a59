//! Image Processing Module
//!
//! Drains the work queue and turns each original image reference into a derived artifact.
//!
//! ## Architecture Overview
//! Each worker is a single sequential pull loop with its own queue subscription; throughput
//! scales by running more workers, which compete for items through the queue.
//! For every delivery:
//! 1. **Fetch** the image bytes from the external reference (bounded timeout).
//! 2. **Decode** into a raster.
//! 3. **Resize** to the canonical width (800) with Lanczos3, height derived from the aspect ratio.
//! 4. **Encode** as JPEG and **persist** under `<output_dir>/<product>/<index>.jpg`.
//! 5. Optionally **link** the artifact back onto the Product Record and invalidate its cache entry.
//!
//! Items are acknowledged only after they are settled. Failures never leave the worker:
//! permanent ones are logged and dropped, transient ones go back to the queue until the
//! attempt budget is spent.
//!
//! ## Submodules
//! - **`source`**: fetching image bytes over HTTP.
//! - **`transform`**: the pure decode/resize/encode step.
//! - **`sink`**: where derived artifacts are written.
//! - **`processor`**: one work item end to end.
//! - **`worker`**: the pool of pull loops, acknowledgement policy and lease renewal.

pub mod processor;
pub mod sink;
pub mod source;
pub mod transform;
pub mod worker;
