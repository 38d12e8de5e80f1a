//! Request-shaping gateway for the screenplay analysis service.
//!
//! Two independent decorators protect network calls:
//! - [`resilience::with_retry`]: bounded exponential backoff with jitter
//! - [`security::RateLimiter`]: quota check against a counting service,
//!   rate-limit headers, structured 429
//!
//! The binary wires both in front of the application as an Axum gateway.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;
pub mod upstream;

pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use resilience::{is_retryable_http_error, with_retry, RetryPolicy};
pub use security::{RateLimitDecision, RateLimitOptions, RateLimiter};
