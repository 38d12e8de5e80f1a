//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the quota class and cache eligibility for a request path
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Longest prefix wins; ties keep configuration order
//! - Unmatched paths fall back to the public class

use crate::config::RouteConfig;
use crate::security::quota::QuotaClass;

/// Name reported for requests no route matched.
pub const DEFAULT_ROUTE: &str = "default";

/// Result of a route lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub name: &'a str,
    pub class: QuotaClass,
    pub cacheable: bool,
}

/// Compiled, immutable route table.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteConfig>,
}

impl RouteTable {
    /// Compile routes from configuration.
    pub fn from_config(mut routes: Vec<RouteConfig>) -> Self {
        // Stable sort keeps configuration order among equal prefix lengths.
        routes.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));
        Self { routes }
    }

    /// Find the route for `path`.
    pub fn match_path(&self, path: &str) -> RouteMatch<'_> {
        self.routes
            .iter()
            .find(|r| path.starts_with(&r.path_prefix))
            .map(|r| RouteMatch {
                name: &r.name,
                class: r.class,
                cacheable: r.cacheable,
            })
            .unwrap_or(RouteMatch {
                name: DEFAULT_ROUTE,
                class: QuotaClass::Public,
                cacheable: false,
            })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
