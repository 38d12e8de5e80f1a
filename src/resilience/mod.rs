//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to an external service:
//!     → retries.rs (run, classify failure, decide whether to retry)
//!     → backoff.rs (compute jittered delay, compound base delay)
//!     → retries.rs (wait, run again)
//! ```
//!
//! # Design Decisions
//! - Each invocation owns its retry state; nothing is shared between calls
//! - Failures are surfaced exactly as the operation produced them
//! - Retries only for idempotent requests when used for forwarding

pub mod backoff;
pub mod retries;

pub use backoff::{RetryPolicy, RetryState};
pub use retries::{is_retryable_http_error, with_retry, HttpFailure};
