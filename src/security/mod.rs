//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → routing (pick quota class by path prefix)
//!     → rate_limit.rs (resolve identifier, consume quota)
//!     → store.rs (hosted counting service or in-process counter)
//!     → admitted: handler runs, rate-limit headers merged
//!     → rejected: structured 429
//! ```
//!
//! # Design Decisions
//! - The limiter holds no counters itself; all shared state lives in the store
//! - Quota exhaustion is a response, never an error
//! - Quota is consumed before the handler runs and is never refunded

pub mod quota;
pub mod rate_limit;
pub mod store;

pub use quota::{Quota, QuotaClass, QuotaTable};
pub use rate_limit::{RateLimitDecision, RateLimitOptions, RateLimiter};
pub use store::{MemoryQuotaStore, QuotaSnapshot, QuotaStore, RateLimitError, RestQuotaStore};
