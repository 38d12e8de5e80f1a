//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → router.rs (longest prefix lookup)
//!     → Return: route name, quota class, cache eligibility
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Sort by prefix length
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route

pub mod router;

pub use router::{RouteMatch, RouteTable};
