//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use screenplay_gateway::config::{GatewayConfig, RouteConfig};
use screenplay_gateway::security::store::Clock;
use screenplay_gateway::security::{MemoryQuotaStore, QuotaClass, RateLimiter};

/// Fixed "now" used by test limiters: 30s into a one-minute window.
pub const NOW_MS: u64 = 1_700_000_030_000;

/// Start a programmable mock backend on an ephemeral port.
///
/// `f` is called once per connection and returns the status and body to send.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let f = Arc::new(f);
    start_backend(move |_request| {
        let f = f.clone();
        async move {
            let (status, body) = f().await;
            (status, Vec::new(), body)
        }
    })
    .await
}

/// Start a mock backend that sees the raw request and picks status, extra headers and body.
pub async fn start_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, Vec<(&'static str, String)>, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let request = read_request(&mut socket).await;
                        let (status, headers, body) = f(request).await;
                        let reason = StatusCode::from_u16(status)
                            .ok()
                            .and_then(|s| s.canonical_reason())
                            .unwrap_or("Unknown");

                        let mut response_str = format!(
                            "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n",
                            status,
                            reason,
                            body.len()
                        );
                        for (name, value) in headers {
                            response_str.push_str(&format!("{}: {}\r\n", name, value));
                        }
                        response_str.push_str("\r\n");
                        response_str.push_str(&body);

                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Read one request: the head, then as many body bytes as Content-Length announces.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        let read = tokio::time::timeout(Duration::from_secs(2), socket.read(&mut buf)).await;
        match read {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => data.extend_from_slice(&buf[..n]),
        }

        let text = String::from_utf8_lossy(&data);
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }

    String::from_utf8_lossy(&data).into_owned()
}

/// Backend that always answers `status` and counts how often it was hit.
pub async fn start_counting_backend(status: u16, body: &'static str) -> (SocketAddr, Arc<AtomicU64>) {
    let calls = Arc::new(AtomicU64::new(0));
    let c = calls.clone();
    let addr = start_programmable_backend(move || {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            (status, body.to_string())
        }
    })
    .await;
    (addr, calls)
}

/// Gateway config pointed at `backend` with fast retries and the usual routes.
pub fn gateway_config(backend: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.upstream.base_url = format!("http://{}", backend);
    config.upstream.timeout_secs = 5;

    config.retries.max_retries = 3;
    config.retries.initial_delay_ms = 10;
    config.retries.max_delay_ms = 50;

    config.routes = vec![
        route("auth", "/api/auth", QuotaClass::Auth, false),
        route("api", "/api", QuotaClass::Api, false),
        route("genres", "/api/genres", QuotaClass::Public, true),
    ];
    config
}

pub fn route(name: &str, prefix: &str, class: QuotaClass, cacheable: bool) -> RouteConfig {
    RouteConfig {
        name: name.into(),
        path_prefix: prefix.into(),
        class,
        cacheable,
    }
}

/// Limiter backed by an in-process store frozen at [`NOW_MS`].
pub fn frozen_limiter(config: &GatewayConfig) -> RateLimiter {
    let clock: Clock = Arc::new(|| NOW_MS);
    RateLimiter::new(Arc::new(MemoryQuotaStore::with_clock(clock.clone())))
        .with_quotas(screenplay_gateway::security::QuotaTable::from_config(&config.rate_limit.tiers))
        .with_clock(clock)
}

pub fn get(path: &str, forwarded_for: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("x-forwarded-for", forwarded_for)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
