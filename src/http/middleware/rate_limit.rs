//! Rate limiting middleware.
//! Applies the route's quota class to every request it wraps.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::http::server::AppState;
use crate::security::RateLimitOptions;

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // Passthrough mode.
    if !state.rate_limit_enabled {
        return next.run(request).await;
    }

    let class = state.routes.match_path(request.uri().path()).class;
    let options = RateLimitOptions::new(class);

    state
        .limiter
        .with_rate_limit(
            request,
            |req| async move { Ok::<_, Infallible>(next.run(req).await) },
            &options,
        )
        .await
}
