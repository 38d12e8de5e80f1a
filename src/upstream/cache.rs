//! Response cache for idempotent upstream reads.
//!
//! # Responsibilities
//! - Store buffered upstream responses by request path and query
//! - Expire and evict entries according to an injected policy
//! - Allow explicit clearing
//!
//! # Design Decisions
//! - The cache is an explicit object passed to whoever needs it
//! - Expiry is checked lazily on read; capacity is enforced on insert
//! - Over capacity, the oldest entry is evicted first
//! - Only shared responses are cached: requests carrying credentials bypass
//!   the cache, and responses marked private or setting cookies are not stored

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap};
use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::observability::metrics;
use crate::upstream::client::UpstreamResponse;

/// Decides when cached entries stop being served.
pub trait EvictionPolicy: Send + Sync {
    /// Whether an entry of this age must no longer be served.
    fn is_expired(&self, age: Duration) -> bool;

    /// Maximum number of entries, `None` for unbounded.
    fn capacity(&self) -> Option<usize>;
}

/// Time-to-live with a capacity bound.
#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl TtlPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_secs),
            max_entries: config.max_entries,
        }
    }
}

impl EvictionPolicy for TtlPolicy {
    fn is_expired(&self, age: Duration) -> bool {
        age >= self.ttl
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.max_entries)
    }
}

/// Whether a request identifies its caller, making the response caller-specific.
pub fn carries_credentials(headers: &HeaderMap) -> bool {
    headers.contains_key(header::AUTHORIZATION) || headers.contains_key(header::COOKIE)
}

/// Whether an upstream response may be shared with other callers.
pub fn is_storable(response: &UpstreamResponse) -> bool {
    if !response.status.is_success() || response.headers.contains_key(header::SET_COOKIE) {
        return false;
    }

    !response
        .headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|directive| directive.trim().to_ascii_lowercase())
        .any(|directive| directive == "private" || directive == "no-store" || directive.starts_with("private="))
}

#[derive(Debug, Clone)]
struct Entry {
    response: UpstreamResponse,
    inserted_at: Instant,
}

/// Thread-safe response cache.
#[derive(Clone)]
pub struct ResponseCache {
    entries: Arc<DashMap<String, Entry>>,
    policy: Arc<dyn EvictionPolicy>,
}

impl ResponseCache {
    pub fn new(policy: Arc<dyn EvictionPolicy>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            policy,
        }
    }

    /// Look up a fresh entry.
    pub fn get(&self, key: &str) -> Option<UpstreamResponse> {
        let expired = match self.entries.get(key) {
            Some(entry) if !self.policy.is_expired(entry.inserted_at.elapsed()) => {
                metrics::record_cache_event("hit");
                return Some(entry.response.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(key);
            metrics::record_cache_event("expired");
        }
        metrics::record_cache_event("miss");
        None
    }

    /// Store a response, evicting as the policy requires.
    pub fn insert(&self, key: impl Into<String>, response: UpstreamResponse) {
        let key = key.into();
        if let Some(capacity) = self.policy.capacity() {
            if capacity == 0 {
                return;
            }
            if !self.entries.contains_key(&key) && self.entries.len() >= capacity {
                self.evict(capacity);
            }
        }

        self.entries.insert(
            key,
            Entry {
                response,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.clear();
        metrics::record_cache_event("clear");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&self, capacity: usize) {
        let policy = self.policy.clone();
        self.entries
            .retain(|_, entry| !policy.is_expired(entry.inserted_at.elapsed()));

        while self.entries.len() >= capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().inserted_at)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    metrics::record_cache_event("evicted");
                }
                None => break,
            }
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}
