//! Counting-service clients.
//!
//! # Responsibilities
//! - Atomically consume one unit of a key's quota and report what is left
//! - Talk to the hosted Redis REST endpoint in production
//! - Provide an in-process store with identical arithmetic for tests and local runs
//!
//! # Design Decisions
//! - Sliding window over two fixed windows: the previous window's count is
//!   weighted by how much of it still overlaps the sliding window
//! - Increment-and-check is atomic at the store (Lua script / map entry lock)
//! - Stores are constructed once at startup and shared via `Arc`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::security::quota::Quota;

/// Errors from the counting service.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The counting service could not be reached.
    #[error("counting service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The counting service answered with an error.
    #[error("counting service error: {0}")]
    Service(String),

    /// The counting service answered with something unexpected.
    #[error("unexpected counting service response: {0}")]
    Decode(String),
}

/// Quota state after a consume call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    /// Whether the request was admitted.
    pub success: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the current window ends, in milliseconds since the Unix epoch.
    pub reset_at_ms: u64,
}

/// Source of "now" in milliseconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Wall clock.
pub fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    })
}

/// A counting service that can consume quota for a key.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Consume one unit of `quota` under `key`.
    async fn consume(&self, key: &str, quota: Quota) -> Result<QuotaSnapshot, RateLimitError>;
}

/// Sliding-window script evaluated by the hosted counting service.
///
/// KEYS: current window key, previous window key.
/// ARGV: limit, now (ms), window (ms), increment.
/// Returns the remaining count, or -1 when the request is refused.
pub const SLIDING_WINDOW_SCRIPT: &str = r#"
local currentKey = KEYS[1]
local previousKey = KEYS[2]
local tokens = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local incrementBy = tonumber(ARGV[4])

local requestsInCurrentWindow = tonumber(redis.call("GET", currentKey) or "0")
local requestsInPreviousWindow = tonumber(redis.call("GET", previousKey) or "0")
local percentageInCurrent = (now % window) / window
requestsInPreviousWindow = math.floor((1 - percentageInCurrent) * requestsInPreviousWindow)
if requestsInPreviousWindow + requestsInCurrentWindow >= tokens then
  return -1
end

local newValue = redis.call("INCRBY", currentKey, incrementBy)
if newValue == incrementBy then
  redis.call("PEXPIRE", currentKey, window * 2 + 1000)
end
return tokens - (newValue + requestsInPreviousWindow)
"#;

#[derive(Debug, Deserialize)]
struct RestReply {
    result: Option<serde_json::Value>,
    error: Option<String>,
}

/// Client for the hosted Redis REST counting service.
pub struct RestQuotaStore {
    client: reqwest::Client,
    url: Url,
    token: String,
    clock: Clock,
}

impl RestQuotaStore {
    /// Create a client for the given REST endpoint and access token.
    pub fn new(url: &str, token: impl Into<String>) -> Result<Self, RateLimitError> {
        let url = Url::parse(url)
            .map_err(|e| RateLimitError::Service(format!("invalid REST URL '{}': {}", url, e)))?;
        Ok(Self {
            client: reqwest::Client::new(),
            url,
            token: token.into(),
            clock: system_clock(),
        })
    }

    /// Replace the clock used to pick the current window.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn command(&self, key: &str, quota: Quota, now: u64) -> (serde_json::Value, u64) {
        let window_ms = quota.window_ms().max(1);
        let index = now / window_ms;
        let current_key = format!("{}:{}", key, index);
        let previous_key = format!("{}:{}", key, index.saturating_sub(1));

        let command = serde_json::json!([
            "EVAL",
            SLIDING_WINDOW_SCRIPT,
            "2",
            current_key,
            previous_key,
            quota.limit.to_string(),
            now.to_string(),
            window_ms.to_string(),
            "1",
        ]);
        (command, (index + 1) * window_ms)
    }
}

#[async_trait]
impl QuotaStore for RestQuotaStore {
    async fn consume(&self, key: &str, quota: Quota) -> Result<QuotaSnapshot, RateLimitError> {
        let now = (self.clock)();
        let (command, reset_at_ms) = self.command(key, quota, now);

        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.token)
            .json(&command)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = match response.json::<RestReply>().await {
                Ok(RestReply { error: Some(error), .. }) => format!("HTTP {}: {}", status, error),
                _ => format!("HTTP {}", status),
            };
            return Err(RateLimitError::Service(detail));
        }

        let reply: RestReply = response
            .json()
            .await
            .map_err(|e| RateLimitError::Decode(e.to_string()))?;

        if let Some(error) = reply.error {
            return Err(RateLimitError::Service(error));
        }

        let remaining = reply
            .result
            .as_ref()
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| RateLimitError::Decode(format!("{:?}", reply.result)))?;

        Ok(QuotaSnapshot {
            success: remaining >= 0,
            limit: quota.limit,
            remaining: remaining.clamp(0, quota.limit as i64) as u32,
            reset_at_ms,
        })
    }
}

impl std::fmt::Debug for RestQuotaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestQuotaStore")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    window_ms: u64,
    index: u64,
    current: u64,
    previous: u64,
}

impl WindowCounter {
    fn new(window_ms: u64, index: u64) -> Self {
        Self {
            window_ms,
            index,
            current: 0,
            previous: 0,
        }
    }

    /// Move the counter forward to window `index`.
    fn roll(&mut self, index: u64) {
        if index == self.index {
            return;
        }
        self.previous = if index == self.index + 1 { self.current } else { 0 };
        self.current = 0;
        self.index = index;
    }
}

/// Number of consume calls between sweeps of stale counters.
const PURGE_EVERY: u64 = 1024;

/// In-process counting service with the same sliding-window arithmetic.
pub struct MemoryQuotaStore {
    counters: DashMap<String, WindowCounter>,
    clock: Clock,
    calls: AtomicU64,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Drop counters whose windows can no longer affect a decision.
    pub fn purge_expired(&self) {
        let now = (self.clock)();
        self.counters
            .retain(|_, counter| now / counter.window_ms <= counter.index + 1);
    }

    fn consume_at(&self, key: &str, quota: Quota, now: u64) -> QuotaSnapshot {
        let window_ms = quota.window_ms().max(1);
        let index = now / window_ms;
        let limit = quota.limit as u64;
        let reset_at_ms = (index + 1) * window_ms;

        let mut counter = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| WindowCounter::new(window_ms, index));
        counter.roll(index);

        let elapsed = (now % window_ms) as f64 / window_ms as f64;
        let weighted_previous = ((1.0 - elapsed) * counter.previous as f64).floor() as u64;

        if weighted_previous + counter.current >= limit {
            return QuotaSnapshot {
                success: false,
                limit: quota.limit,
                remaining: 0,
                reset_at_ms,
            };
        }

        counter.current += 1;
        let remaining = limit.saturating_sub(counter.current + weighted_previous);

        QuotaSnapshot {
            success: true,
            limit: quota.limit,
            remaining: remaining as u32,
            reset_at_ms,
        }
    }
}

impl Default for MemoryQuotaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn consume(&self, key: &str, quota: Quota) -> Result<QuotaSnapshot, RateLimitError> {
        let now = (self.clock)();
        let snapshot = self.consume_at(key, quota, now);

        if self.calls.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            self.purge_expired();
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn manual_clock(start: u64) -> (Arc<AtomicU64>, Clock) {
        let now = Arc::new(AtomicU64::new(start));
        let n = now.clone();
        (now, Arc::new(move || n.load(Ordering::SeqCst)))
    }

    #[tokio::test]
    async fn test_memory_store_counts_down() {
        let (_, clock) = manual_clock(120_000);
        let store = MemoryQuotaStore::with_clock(clock);
        let quota = Quota::per_minute(3);

        let remaining: Vec<_> = [
            store.consume("k", quota).await.unwrap(),
            store.consume("k", quota).await.unwrap(),
            store.consume("k", quota).await.unwrap(),
        ]
        .iter()
        .map(|s| (s.success, s.remaining))
        .collect();
        assert_eq!(remaining, vec![(true, 2), (true, 1), (true, 0)]);

        let refused = store.consume("k", quota).await.unwrap();
        assert!(!refused.success);
        assert_eq!(refused.remaining, 0);
        assert_eq!(refused.reset_at_ms, 180_000);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (_, clock) = manual_clock(0);
        let store = MemoryQuotaStore::with_clock(clock);
        let quota = Quota::per_minute(1);

        assert!(store.consume("a", quota).await.unwrap().success);
        assert!(!store.consume("a", quota).await.unwrap().success);
        assert!(store.consume("b", quota).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_previous_window_is_weighted() {
        let (now, clock) = manual_clock(0);
        let store = MemoryQuotaStore::with_clock(clock);
        let quota = Quota::per_minute(10);

        for _ in 0..10 {
            assert!(store.consume("k", quota).await.unwrap().success);
        }

        // A quarter into the next window, 75% of the previous 10 still counts.
        now.store(75_000, Ordering::SeqCst);
        let snapshot = store.consume("k", quota).await.unwrap();
        assert!(snapshot.success);
        assert_eq!(snapshot.remaining, 10 - (7 + 1));

        // Two windows later nothing carries over.
        now.store(240_000, Ordering::SeqCst);
        let snapshot = store.consume("k", quota).await.unwrap();
        assert_eq!(snapshot.remaining, 9);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (now, clock) = manual_clock(0);
        let store = MemoryQuotaStore::with_clock(clock);
        store.consume("k", Quota::per_minute(5)).await.unwrap();
        assert_eq!(store.len(), 1);

        now.store(60_500, Ordering::SeqCst);
        store.purge_expired();
        assert_eq!(store.len(), 1);

        now.store(180_000, Ordering::SeqCst);
        store.purge_expired();
        assert!(store.is_empty());
    }

    #[test]
    fn test_rest_command_layout() {
        let (_, clock) = manual_clock(0);
        let store = RestQuotaStore::new("https://example.upstash.io", "token")
            .unwrap()
            .with_clock(clock);

        let (command, reset_at) = store.command("ratelimit:auth:1.2.3.4", Quota::per_minute(5), 125_000);
        assert_eq!(reset_at, 180_000);
        assert_eq!(command[0], "EVAL");
        assert_eq!(command[2], "2");
        assert_eq!(command[3], "ratelimit:auth:1.2.3.4:2");
        assert_eq!(command[4], "ratelimit:auth:1.2.3.4:1");
        assert_eq!(command[5], "5");
        assert_eq!(command[7], "60000");
    }

    #[test]
    fn test_rest_store_rejects_bad_url() {
        assert!(matches!(
            RestQuotaStore::new("not a url", "token"),
            Err(RateLimitError::Service(_))
        ));
    }
}
