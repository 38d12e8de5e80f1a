//! Retry logic.
//!
//! # Responsibilities
//! - Execute an async operation with bounded retries and jittered backoff
//! - Classify HTTP failures as transient or terminal
//!
//! # Design Decisions
//! - The final failure is returned unchanged, never wrapped
//! - At most `max_retries` retries after the first attempt
//! - A started wait always runs to completion (no cancellation)
//! - Connection errors always retryable; only a fixed set of statuses are

use std::future::Future;

use axum::http::StatusCode;

use crate::observability::metrics;
use crate::resilience::backoff::RetryPolicy;

/// Status codes worth retrying.
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// A failure that may carry an HTTP response.
pub trait HttpFailure {
    /// Status of the response attached to the failure, `None` for network-level failures.
    fn status(&self) -> Option<StatusCode>;
}

impl HttpFailure for reqwest::Error {
    fn status(&self) -> Option<StatusCode> {
        reqwest::Error::status(self)
    }
}

/// True for network-level failures and for the statuses in [`RETRYABLE_STATUSES`].
pub fn is_retryable_http_error<E: HttpFailure + ?Sized>(error: &E) -> bool {
    match error.status() {
        None => true,
        Some(status) => RETRYABLE_STATUSES.contains(&status.as_u16()),
    }
}

/// Run `operation` until it succeeds, the policy refuses the failure, or retries run out.
pub async fn with_retry<F, Fut, T, E>(mut operation: F, policy: &RetryPolicy<E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut state = policy.start();

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if state.exhausted(policy) || !policy.should_retry(&error) {
            if state.attempts_made > 0 {
                tracing::debug!(retries = state.attempts_made, "Giving up after retries");
            }
            return Err(error);
        }

        let delay = state.next_delay(policy);
        tracing::info!(attempt = state.attempts_made, delay = ?delay, "Retrying operation");
        metrics::record_retry();

        tokio::time::sleep(delay).await;
        state.advance(policy);
    }
}
