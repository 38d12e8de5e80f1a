//! Forwarding handler.
//! Relays admitted requests to the application and caches eligible reads.

use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode},
    response::{IntoResponse, Response},
};

use crate::http::request::request_id;
use crate::http::response::{bad_gateway, json_error};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::upstream::{carries_credentials, is_storable, UpstreamError};

pub async fn forward_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(&request).to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let route = state.routes.match_path(&path);
    let route_name = route.name.to_string();
    let use_cache =
        route.cacheable && method == Method::GET && !carries_credentials(request.headers());

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        route = %route_name,
        "Forwarding request"
    );

    if use_cache {
        if let Some(cached) = state.cache.get(&path_and_query) {
            tracing::debug!(request_id = %request_id, path = %path_and_query, "Served from cache");
            metrics::record_request(method.as_str(), cached.status.as_u16(), &route_name, start_time);
            return cached.into_response();
        }
    }

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => {
            tracing::warn!(request_id = %request_id, "Request body too large");
            metrics::record_request(method.as_str(), 413, &route_name, start_time);
            return json_error(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large", None);
        }
    };

    let response = match state
        .upstream
        .forward(parts.method, &path_and_query, &parts.headers, body)
        .await
    {
        Ok(upstream) => {
            if use_cache && is_storable(&upstream) {
                state.cache.insert(path_and_query.clone(), upstream.clone());
            }
            upstream.into_response()
        }
        // Retries exhausted on a transient status: relay what the upstream said.
        Err(UpstreamError::Status(upstream)) => upstream.into_response(),
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            bad_gateway()
        }
    };

    metrics::record_request(method.as_str(), response.status().as_u16(), &route_name, start_time);
    response
}
