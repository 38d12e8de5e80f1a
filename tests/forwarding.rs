//! Upstream forwarding: retries, relayed failures and caching.

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::net::TcpListener;
use tower::ServiceExt;

use common::{
    body_string, frozen_limiter, gateway_config, get, route, start_backend, start_counting_backend,
    start_programmable_backend,
};
use screenplay_gateway::security::QuotaClass;
use screenplay_gateway::{HttpServer, Shutdown};

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let calls = Arc::new(AtomicU64::new(0));
    let c = calls.clone();
    let backend = start_programmable_backend(move || {
        let c = c.clone();
        async move {
            if c.fetch_add(1, Ordering::SeqCst) < 2 {
                (503, "warming up".to_string())
            } else {
                (200, "analysis ready".to_string())
            }
        }
    })
    .await;

    let config = gateway_config(backend);
    let server = HttpServer::with_limiter(config.clone(), frozen_limiter(&config)).unwrap();

    let response = server
        .router()
        .oneshot(get("/api/scripts/7/analysis", "203.0.113.7"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "analysis ready");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_retries_relay_last_status() {
    let (backend, calls) = start_counting_backend(503, "down").await;
    let config = gateway_config(backend);
    let server = HttpServer::with_limiter(config.clone(), frozen_limiter(&config)).unwrap();

    let response = server
        .router()
        .oneshot(get("/api/scripts/7", "203.0.113.7"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(response).await, "down");
    // One initial call plus three retries.
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_post_is_not_retried() {
    let (backend, calls) = start_counting_backend(503, "down").await;
    let config = gateway_config(backend);
    let server = HttpServer::with_limiter(config.clone(), frozen_limiter(&config)).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/scripts")
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::from("FADE IN:"))
        .unwrap();
    let response = server.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let (backend, calls) = start_counting_backend(404, "no such script").await;
    let config = gateway_config(backend);
    let server = HttpServer::with_limiter(config.clone(), frozen_limiter(&config)).unwrap();

    let response = server
        .router()
        .oneshot(get("/api/scripts/999", "203.0.113.7"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    // Bind then drop to get a port nobody listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let mut config = gateway_config(addr);
    config.retries.max_retries = 1;
    let server = HttpServer::with_limiter(config.clone(), frozen_limiter(&config)).unwrap();

    let response = server
        .router()
        .oneshot(get("/api/scripts/7", "203.0.113.7"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_cacheable_route_served_from_cache() {
    let (backend, calls) = start_counting_backend(200, "drama,comedy,thriller").await;
    let config = gateway_config(backend);
    let server = HttpServer::with_limiter(config.clone(), frozen_limiter(&config)).unwrap();

    for _ in 0..3 {
        let response = server
            .router()
            .oneshot(get("/api/genres", "203.0.113.7"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "drama,comedy,thriller");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    server.state().cache.clear();
    server
        .router()
        .oneshot(get("/api/genres", "203.0.113.7"))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_reads_are_not_cached() {
    let (backend, calls) = start_counting_backend(404, "gone").await;
    let config = gateway_config(backend);
    let server = HttpServer::with_limiter(config.clone(), frozen_limiter(&config)).unwrap();

    for _ in 0..2 {
        server
            .router()
            .oneshot(get("/api/genres", "203.0.113.7"))
            .await
            .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(server.state().cache.is_empty());
}

#[tokio::test]
async fn test_scheme_relative_path_stays_on_upstream() {
    let (backend, upstream_calls) = start_counting_backend(200, "application").await;
    let (other, other_calls) = start_counting_backend(200, "OTHER HOST").await;
    let config = gateway_config(backend);
    let server = HttpServer::with_limiter(config.clone(), frozen_limiter(&config)).unwrap();

    let response = server
        .router()
        .oneshot(get(&format!("//{}/secret", other), "203.0.113.7"))
        .await
        .unwrap();

    assert_eq!(body_string(response).await, "application");
    assert_eq!(other_calls.load(Ordering::SeqCst), 0);
    assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
}

/// Backend answering `response #N` with an optional extra header on every reply.
async fn numbered_backend(header: Option<(&'static str, &'static str)>) -> (std::net::SocketAddr, Arc<AtomicU64>) {
    let calls = Arc::new(AtomicU64::new(0));
    let c = calls.clone();
    let addr = start_backend(move |_request| {
        let n = c.fetch_add(1, Ordering::SeqCst);
        async move {
            let headers = header
                .map(|(name, value)| vec![(name, value.to_string())])
                .unwrap_or_default();
            (200, headers, format!("response #{}", n))
        }
    })
    .await;
    (addr, calls)
}

fn cached_genres_config(backend: std::net::SocketAddr) -> screenplay_gateway::GatewayConfig {
    let mut config = gateway_config(backend);
    config
        .routes
        .push(route("mine", "/api/genres/mine", QuotaClass::Api, true));
    config
}

fn get_with(path: &str, name: &str, value: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("x-forwarded-for", "203.0.113.7")
        .header(name, value)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_authorized_reads_are_not_shared() {
    let (backend, calls) = numbered_backend(None).await;
    let config = cached_genres_config(backend);
    let server = HttpServer::with_limiter(config.clone(), frozen_limiter(&config)).unwrap();

    let alice = server
        .router()
        .oneshot(get_with("/api/genres/mine", "authorization", "Bearer alice"))
        .await
        .unwrap();
    let bob = server
        .router()
        .oneshot(get_with("/api/genres/mine", "authorization", "Bearer bob"))
        .await
        .unwrap();

    assert_eq!(body_string(alice).await, "response #0");
    assert_eq!(body_string(bob).await, "response #1");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(server.state().cache.is_empty());
}

#[tokio::test]
async fn test_cookie_reads_bypass_cache() {
    let (backend, calls) = numbered_backend(None).await;
    let config = cached_genres_config(backend);
    let server = HttpServer::with_limiter(config.clone(), frozen_limiter(&config)).unwrap();

    // An anonymous read fills the cache; a cookie-bearing read must not be served from it.
    let anonymous = server
        .router()
        .oneshot(get("/api/genres/mine", "203.0.113.7"))
        .await
        .unwrap();
    assert_eq!(body_string(anonymous).await, "response #0");

    let with_cookie = server
        .router()
        .oneshot(get_with("/api/genres/mine", "cookie", "session=alice"))
        .await
        .unwrap();
    assert_eq!(body_string(with_cookie).await, "response #1");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_private_responses_are_not_cached() {
    for header in [
        ("Cache-Control", "private, max-age=60"),
        ("Cache-Control", "no-store"),
        ("Set-Cookie", "session=abc; HttpOnly"),
    ] {
        let (backend, calls) = numbered_backend(Some(header)).await;
        let config = gateway_config(backend);
        let server = HttpServer::with_limiter(config.clone(), frozen_limiter(&config)).unwrap();

        for expected in ["response #0", "response #1"] {
            let response = server
                .router()
                .oneshot(get("/api/genres", "203.0.113.7"))
                .await
                .unwrap();
            assert_eq!(body_string(response).await, expected, "{:?}", header);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2, "{:?}", header);
        assert!(server.state().cache.is_empty(), "{:?}", header);
    }
}

#[tokio::test]
async fn test_served_over_tcp_and_drains_on_shutdown() {
    let (backend, _calls) = start_counting_backend(200, "hello").await;
    let config = gateway_config(backend);
    let server = HttpServer::with_limiter(config.clone(), frozen_limiter(&config)).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/api/scripts", addr))
        .header("x-forwarded-for", "203.0.113.7")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-ratelimit-limit"], "60");
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "hello");

    shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(result.is_ok(), "server did not stop after shutdown");
}
