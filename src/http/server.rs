//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, timeout, request ID, concurrency limit)
//! - Gate forwarded traffic behind the rate limiter
//! - Bind server to listener and shut down gracefully

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::http::middleware::rate_limit_middleware;
use crate::http::proxy::forward_handler;
use crate::http::request::{UuidRequestId, X_REQUEST_ID};
use crate::lifecycle::StartupError;
use crate::routing::RouteTable;
use crate::security::RateLimiter;
use crate::upstream::{ResponseCache, TtlPolicy, UpstreamClient};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub limiter: RateLimiter,
    pub rate_limit_enabled: bool,
    pub upstream: UpstreamClient,
    pub cache: ResponseCache,
    pub max_body_bytes: usize,
}

impl AppState {
    /// Assemble state from configuration and an already constructed limiter.
    pub fn new(config: &GatewayConfig, limiter: RateLimiter) -> Result<Self, StartupError> {
        Ok(Self {
            routes: Arc::new(RouteTable::from_config(config.routes.clone())),
            limiter,
            rate_limit_enabled: config.rate_limit.enabled,
            upstream: UpstreamClient::new(&config.upstream, &config.retries)?,
            cache: ResponseCache::new(Arc::new(TtlPolicy::from_config(&config.cache))),
            max_body_bytes: config.upstream.max_body_bytes,
        })
    }
}

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a server, connecting the rate limiter to its configured counting service.
    pub fn new(config: GatewayConfig) -> Result<Self, StartupError> {
        let limiter = RateLimiter::from_config(&config.rate_limit)?;
        Self::with_limiter(config, limiter)
    }

    /// Create a server around a caller-supplied limiter.
    pub fn with_limiter(config: GatewayConfig, limiter: RateLimiter) -> Result<Self, StartupError> {
        let state = AppState::new(&config, limiter)?;
        let router = build_router(&config, state.clone());
        Ok(Self { router, state })
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Shared state, e.g. to clear the response cache.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(config: &GatewayConfig, state: AppState) -> Router {
    let limited = Router::new()
        .fallback(forward_handler)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware));

    Router::new()
        .route("/healthz", get(health))
        .merge(limited)
        .with_state(state)
        .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
}
