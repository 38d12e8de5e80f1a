//! Response helpers.
//!
//! # Responsibilities
//! - Build JSON error responses with a stable shape
//! - Merge computed headers onto responses produced elsewhere
//! - Map internal failures to generic statuses without leaking detail

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Body of every gateway-generated error.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

/// A JSON error response.
pub fn json_error(status: StatusCode, error: &'static str, message: Option<&'static str>) -> Response {
    (status, Json(ErrorBody { error, message })).into_response()
}

/// Generic 500 used whenever a wrapped handler fails.
pub fn internal_error() -> Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
}

/// Generic 502 used when the upstream cannot be reached.
pub fn bad_gateway() -> Response {
    json_error(StatusCode::BAD_GATEWAY, "Bad gateway", Some("Upstream request failed"))
}

/// Copy `headers` onto `response`, replacing existing values of the same name.
pub fn merge_headers(mut response: Response, headers: HeaderMap) -> Response {
    let target = response.headers_mut();
    for (name, value) in headers.iter() {
        target.insert(name.clone(), value.clone());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue};

    #[tokio::test]
    async fn test_internal_error_shape() {
        let response = internal_error();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({ "error": "Internal server error" }));
    }

    #[test]
    fn test_merge_replaces_existing() {
        let mut response = (StatusCode::OK, "ok").into_response();
        response
            .headers_mut()
            .insert("x-ratelimit-remaining", HeaderValue::from_static("99"));

        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("4"));
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("5"));

        let merged = merge_headers(response, headers);
        assert_eq!(merged.headers().get("x-ratelimit-remaining").unwrap(), "4");
        assert_eq!(merged.headers().get("x-ratelimit-limit").unwrap(), "5");
        assert_eq!(merged.headers().get_all("x-ratelimit-remaining").iter().count(), 1);
    }
}
