//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (delays, factors, tier sizes)
//! - Check that URLs parse and credentials come in pairs
//! - Detect duplicate route names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{GatewayConfig, TierConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    if url::Url::parse(&config.upstream.base_url).is_err() {
        errors.push(ValidationError::new("upstream.base_url", "is not a valid URL"));
    }
    if config.upstream.timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.timeout_secs", "must be greater than 0"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    let retries = &config.retries;
    if !(retries.backoff_factor >= 1.0) {
        errors.push(ValidationError::new("retries.backoff_factor", "must be at least 1"));
    }
    if retries.initial_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.initial_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    let rate_limit = &config.rate_limit;
    check_tier(&mut errors, "rate_limit.tiers.auth", &rate_limit.tiers.auth);
    check_tier(&mut errors, "rate_limit.tiers.api", &rate_limit.tiers.api);
    check_tier(&mut errors, "rate_limit.tiers.public", &rate_limit.tiers.public);

    if let Some(rest_url) = &rate_limit.rest_url {
        if url::Url::parse(rest_url).is_err() {
            errors.push(ValidationError::new("rate_limit.rest_url", "is not a valid URL"));
        }
        if rate_limit.rest_token.as_deref().map_or(true, str::is_empty) {
            errors.push(ValidationError::new(
                "rate_limit.rest_token",
                "is required when rest_url is set",
            ));
        }
    }

    let mut names = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(
                format!("routes[{}].path_prefix", i),
                "must start with '/'",
            ));
        }
        if !names.insert(route.name.as_str()) {
            errors.push(ValidationError::new(
                format!("routes[{}].name", i),
                format!("duplicate route name '{}'", route.name),
            ));
        }
    }

    if config.cache.max_entries == 0 {
        errors.push(ValidationError::new("cache.max_entries", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_tier(errors: &mut Vec<ValidationError>, field: &str, tier: &TierConfig) {
    if tier.window_secs == 0 {
        errors.push(ValidationError::new(format!("{}.window_secs", field), "must be greater than 0"));
    }
    if tier.requests == 0 {
        errors.push(ValidationError::new(format!("{}.requests", field), "must be greater than 0"));
    }
}
