//! Rate limiting with tiered quota classes.
//!
//! The limiter is a stateless client of a [`QuotaStore`]. Every decision,
//! admitted or not, carries `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
//! `X-RateLimit-Reset` (epoch milliseconds). Rejections are always returned as
//! a 429 response, never as an error.

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::FutureExt;
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::http::response::{internal_error, merge_headers};
use crate::observability::metrics;
use crate::security::quota::{QuotaClass, QuotaTable};
use crate::security::store::{
    system_clock, Clock, MemoryQuotaStore, QuotaSnapshot, QuotaStore, RateLimitError,
    RestQuotaStore,
};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Header carrying the client address behind the load balancer.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Identifier used when nothing identifies the caller.
pub const ANONYMOUS: &str = "anonymous";

/// Called with the 429 response before it is returned.
pub type RejectionHook = Arc<dyn Fn(&Response) + Send + Sync>;

/// Per-call options.
#[derive(Clone)]
pub struct RateLimitOptions {
    pub class: QuotaClass,
    /// Explicit counting key, e.g. a user ID.
    pub identifier: Option<String>,
    pub on_rejected: Option<RejectionHook>,
}

impl RateLimitOptions {
    pub fn new(class: QuotaClass) -> Self {
        Self {
            class,
            identifier: None,
            on_rejected: None,
        }
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn on_rejected<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.on_rejected = Some(Arc::new(hook));
        self
    }
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self::new(QuotaClass::Api)
    }
}

impl std::fmt::Debug for RateLimitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitOptions")
            .field("class", &self.class)
            .field("identifier", &self.identifier)
            .field("on_rejected", &self.on_rejected.is_some())
            .finish()
    }
}

/// Outcome of a quota check.
#[derive(Debug)]
pub enum RateLimitDecision {
    /// Proceed; merge `headers` into the eventual response.
    Admitted { headers: HeaderMap },
    /// Return `response` (a 429) as-is.
    Rejected { response: Response },
}

impl RateLimitDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, RateLimitDecision::Admitted { .. })
    }
}

#[derive(Debug, Serialize)]
struct RejectionBody {
    error: &'static str,
    message: &'static str,
    #[serde(rename = "retryAfter")]
    retry_after: u64,
}

/// Quota gate in front of request handlers.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn QuotaStore>,
    quotas: QuotaTable,
    prefix: String,
    clock: Clock,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn QuotaStore>) -> Self {
        Self {
            store,
            quotas: QuotaTable::default(),
            prefix: "ratelimit".to_string(),
            clock: system_clock(),
        }
    }

    pub fn with_quotas(mut self, quotas: QuotaTable) -> Self {
        self.quotas = quotas;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Clock used to compute `retryAfter`.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Build the limiter and its counting-service client from configuration.
    ///
    /// Without a REST URL the limiter counts in process, which is only correct
    /// for a single gateway instance.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        let store: Arc<dyn QuotaStore> = match (&config.rest_url, &config.rest_token) {
            (Some(url), Some(token)) => {
                tracing::info!(url = %url, "Using hosted counting service");
                Arc::new(RestQuotaStore::new(url, token.clone())?)
            }
            _ => {
                tracing::warn!("No counting service configured, counting requests in process");
                Arc::new(MemoryQuotaStore::new())
            }
        };

        Ok(Self::new(store)
            .with_quotas(QuotaTable::from_config(&config.tiers))
            .with_prefix(config.prefix.clone()))
    }

    pub fn quotas(&self) -> &QuotaTable {
        &self.quotas
    }

    /// Explicit identifier, else the forwarded-for header, else [`ANONYMOUS`].
    pub fn resolve_identifier(headers: &HeaderMap, explicit: Option<&str>) -> String {
        if let Some(identifier) = explicit {
            return identifier.to_string();
        }
        headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(ANONYMOUS)
            .to_string()
    }

    /// Consume one unit of quota for the request described by `headers`.
    pub async fn check(
        &self,
        headers: &HeaderMap,
        options: &RateLimitOptions,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let identifier = Self::resolve_identifier(headers, options.identifier.as_deref());
        let key = format!("{}:{}:{}", self.prefix, options.class, identifier);
        let quota = self.quotas.get(options.class);

        let snapshot = self.store.consume(&key, quota).await?;
        metrics::record_quota_check(options.class.as_str(), snapshot.success);

        let headers = rate_limit_headers(&snapshot);
        if snapshot.success {
            return Ok(RateLimitDecision::Admitted { headers });
        }

        let retry_after = retry_after_secs(snapshot.reset_at_ms, (self.clock)());
        tracing::warn!(
            client = %identifier,
            class = %options.class,
            retry_after,
            "Rate limit exceeded"
        );
        metrics::record_rate_limited(options.class.as_str());

        let response = too_many_requests(headers, retry_after);
        if let Some(hook) = &options.on_rejected {
            hook(&response);
        }
        Ok(RateLimitDecision::Rejected { response })
    }

    /// Check the quota, run `handler` once if admitted, and merge the rate-limit headers.
    ///
    /// Handler failures and panics become a generic 500; the consumed unit is
    /// not refunded. A failing counting service also yields a 500.
    pub async fn with_rate_limit<F, Fut, E>(
        &self,
        request: Request<Body>,
        handler: F,
        options: &RateLimitOptions,
    ) -> Response
    where
        F: FnOnce(Request<Body>) -> Fut,
        Fut: Future<Output = Result<Response, E>>,
        E: Display,
    {
        let headers = match self.check(request.headers(), options).await {
            Ok(RateLimitDecision::Admitted { headers }) => headers,
            Ok(RateLimitDecision::Rejected { response }) => return response,
            Err(e) => {
                tracing::error!(error = %e, class = %options.class, "Rate limit check failed");
                return internal_error();
            }
        };

        match AssertUnwindSafe(handler(request)).catch_unwind().await {
            Ok(Ok(response)) => merge_headers(response, headers),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Handler failed");
                merge_headers(internal_error(), headers)
            }
            Err(_) => {
                tracing::error!("Handler panicked");
                merge_headers(internal_error(), headers)
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("quotas", &self.quotas)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Whole seconds until `reset_at_ms`, rounded up.
pub fn retry_after_secs(reset_at_ms: u64, now_ms: u64) -> u64 {
    reset_at_ms.saturating_sub(now_ms).div_ceil(1000)
}

fn rate_limit_headers(snapshot: &QuotaSnapshot) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(snapshot.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(snapshot.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(snapshot.reset_at_ms));
    headers
}

fn too_many_requests(mut headers: HeaderMap, retry_after: u64) -> Response {
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    let body = RejectionBody {
        error: "Too many requests",
        message: "Rate limit exceeded",
        retry_after,
    };
    (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
}
