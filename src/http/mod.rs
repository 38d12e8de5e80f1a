//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, timeout, concurrency limit)
//!     → /healthz answered locally
//!     → middleware/rate_limit.rs (quota check by route class)
//!     → proxy.rs (cache lookup, forward with retry)
//!     → response.rs (merge rate-limit headers, error bodies)
//!     → Send to client
//! ```

pub mod middleware;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::{build_router, AppState, HttpServer};
