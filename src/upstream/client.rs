//! Upstream HTTP client with retry.
//!
//! # Responsibilities
//! - Forward method, path, headers and buffered body to the application
//! - Retry idempotent requests on transient failures
//! - Buffer upstream responses so they can be cached and relayed
//!
//! # Design Decisions
//! - Never retry POST/PATCH (non-idempotent)
//! - Retryable statuses are surfaced as errors so the retry loop sees them;
//!   the last such response is still relayed to the client after exhaustion
//! - Hop-by-hop headers are stripped in both directions
//! - The client's path is appended to the base URL as opaque data, never
//!   resolved as a reference, so the upstream host cannot be changed

use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderName, Method, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use url::Url;

use crate::config::{RetryConfig, UpstreamConfig};
use crate::resilience::retries::RETRYABLE_STATUSES;
use crate::resilience::{is_retryable_http_error, with_retry, HttpFailure, RetryPolicy};

const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::CONTENT_LENGTH,
];

/// Errors from forwarding a request upstream.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection, timeout or body read failure.
    #[error("upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The upstream answered with a retryable status.
    #[error("upstream returned {}", .0.status)]
    Status(UpstreamResponse),

    /// The request path could not be joined onto the base URL.
    #[error("invalid upstream URL: {0}")]
    Url(#[from] url::ParseError),
}

impl HttpFailure for UpstreamError {
    fn status(&self) -> Option<StatusCode> {
        match self {
            UpstreamError::Transport(e) => HttpFailure::status(e),
            UpstreamError::Status(response) => Some(response.status),
            UpstreamError::Url(_) => None,
        }
    }
}

/// Retry predicate for forwarded requests.
///
/// A malformed URL fails the same way on every attempt.
pub fn is_retryable_upstream_error(error: &UpstreamError) -> bool {
    match error {
        UpstreamError::Url(_) => false,
        other => is_retryable_http_error(other),
    }
}

/// A fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Client for the application behind the gateway.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: Url,
    policy: RetryPolicy<UpstreamError>,
    retries_enabled: bool,
}

impl UpstreamClient {
    /// Create a client from configuration.
    pub fn new(upstream: &UpstreamConfig, retries: &RetryConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(upstream.timeout_secs))
            .build()?;

        let base_url = Url::parse(&upstream.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(UpstreamError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }

        Ok(Self {
            client,
            base_url,
            policy: RetryPolicy::from_config(retries).retry_on(is_retryable_upstream_error),
            retries_enabled: retries.enabled,
        })
    }

    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy<UpstreamError>) -> Self {
        self.policy = policy;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Forward a request, retrying idempotent methods.
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.upstream_url(path_and_query);
        let headers = strip_hop_by_hop(headers);

        let attempt = || self.send_once(method.clone(), url.clone(), headers.clone(), body.clone());

        if self.retries_enabled && method.is_idempotent() {
            with_retry(attempt, &self.policy).await
        } else {
            attempt().await
        }
    }

    /// Append the request's path and query to the base URL.
    ///
    /// The result always keeps the base URL's scheme, host and port.
    pub fn upstream_url(&self, path_and_query: &str) -> Url {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let mut url = self.base_url.clone();
        let base_path = self.base_url.path().trim_end_matches('/');
        if path.starts_with('/') {
            url.set_path(&format!("{}{}", base_path, path));
        } else {
            url.set_path(&format!("{}/{}", base_path, path));
        }
        url.set_query(query);
        url
    }

    async fn send_once(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse, UpstreamError> {
        tracing::debug!(method = %method, url = %url, "Forwarding upstream");

        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let headers = strip_hop_by_hop(response.headers());
        let body = response.bytes().await?;
        let response = UpstreamResponse { status, headers, body };

        if RETRYABLE_STATUSES.contains(&status.as_u16()) {
            tracing::warn!(status = %status, "Upstream returned retryable status");
            return Err(UpstreamError::Status(response));
        }
        Ok(response)
    }
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("base_url", &self.base_url.as_str())
            .field("policy", &self.policy)
            .field("retries_enabled", &self.retries_enabled)
            .finish()
    }
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in HOP_BY_HOP.iter() {
        out.remove(name);
    }
    out.remove(header::HOST);
    out
}
