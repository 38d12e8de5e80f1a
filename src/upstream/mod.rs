//! Upstream subsystem.
//!
//! # Data Flow
//! ```text
//! Admitted request:
//!     → cache.rs (anonymous GET on cacheable route: serve fresh entry if present)
//!     → client.rs (forward, retry idempotent methods on transient failure)
//!     → cache.rs (store shareable 2xx GET responses)
//!     → relay response to client
//! ```

pub mod cache;
pub mod client;

pub use cache::{carries_credentials, is_storable, EvictionPolicy, ResponseCache, TtlPolicy};
pub use client::{is_retryable_upstream_error, UpstreamClient, UpstreamError, UpstreamResponse};
