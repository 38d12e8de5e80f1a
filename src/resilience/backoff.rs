//! Exponential backoff with jitter.
//!
//! The delay before retry `n` (1-based) is
//! `min(base * factor^(n-1) + jitter, max_delay)`, where `base` is itself
//! multiplied by `factor` (and clamped) after every retry. Both terms compound,
//! so the curve is steeper than a single-formula exponential backoff.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Upper bound (exclusive) of the random jitter added to each delay, in milliseconds.
pub const MAX_JITTER_MS: f64 = 1000.0;

/// Predicate deciding whether a failure is worth retrying.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Retry configuration for a single call to [`with_retry`](super::retries::with_retry).
pub struct RetryPolicy<E> {
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,
    /// Base delay before the first retry.
    pub initial_delay: Duration,
    /// Clamp applied to every computed delay.
    pub max_delay: Duration,
    /// Growth multiplier, at least 1.
    pub backoff_factor: f64,
    retry_on: RetryPredicate<E>,
}

impl<E> RetryPolicy<E> {
    /// Override the number of retries.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the initial delay.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Override the delay clamp.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Override the growth multiplier. Values below 1 are raised to 1.
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = if factor >= 1.0 { factor } else { 1.0 };
        self
    }

    /// Only retry failures for which `predicate` returns true.
    pub fn retry_on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Arc::new(predicate);
        self
    }

    /// Evaluate the retry predicate.
    pub fn should_retry(&self, error: &E) -> bool {
        (self.retry_on)(error)
    }

    /// Build a policy from the gateway's retry configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::default()
            .max_retries(config.max_retries)
            .initial_delay(Duration::from_millis(config.initial_delay_ms))
            .max_delay(Duration::from_millis(config.max_delay_ms))
            .backoff_factor(config.backoff_factor)
    }

    /// Fresh per-invocation state.
    pub fn start(&self) -> RetryState {
        RetryState {
            attempts_made: 0,
            current_base_delay: self.initial_delay.min(self.max_delay),
        }
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 2.0,
            retry_on: Arc::new(|_| true),
        }
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            backoff_factor: self.backoff_factor,
            retry_on: self.retry_on.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .finish_non_exhaustive()
    }
}

/// Mutable state scoped to one retry invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    /// Retries performed so far (the initial attempt is not counted).
    pub attempts_made: u32,
    /// Base delay, compounded by the factor after every retry.
    pub current_base_delay: Duration,
}

impl RetryState {
    /// Whether the retry budget is spent.
    pub fn exhausted<E>(&self, policy: &RetryPolicy<E>) -> bool {
        self.attempts_made >= policy.max_retries
    }

    /// Register a retry and return how long to wait before the next attempt.
    pub fn next_delay<E>(&mut self, policy: &RetryPolicy<E>) -> Duration {
        let jitter_ms = rand::thread_rng().gen_range(0.0..MAX_JITTER_MS);
        self.next_delay_with_jitter(policy, jitter_ms)
    }

    /// Deterministic variant of [`next_delay`](Self::next_delay).
    pub fn next_delay_with_jitter<E>(&mut self, policy: &RetryPolicy<E>, jitter_ms: f64) -> Duration {
        self.attempts_made += 1;

        let exponent = (self.attempts_made - 1) as i32;
        let base_ms = as_millis_f64(self.current_base_delay);
        let max_ms = as_millis_f64(policy.max_delay);
        let delay_ms = (base_ms * policy.backoff_factor.powi(exponent) + jitter_ms).min(max_ms);

        from_millis_f64(delay_ms)
    }

    /// Compound the base delay once the wait has elapsed.
    pub fn advance<E>(&mut self, policy: &RetryPolicy<E>) {
        let next = as_millis_f64(self.current_base_delay) * policy.backoff_factor;
        let capped = next.min(as_millis_f64(policy.max_delay));
        self.current_base_delay = from_millis_f64(capped);
    }
}

fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_micros() as f64 / 1000.0
}

// Microsecond resolution keeps whole-millisecond delays exact.
fn from_millis_f64(ms: f64) -> Duration {
    Duration::from_micros((ms.max(0.0) * 1000.0).round() as u64)
}
