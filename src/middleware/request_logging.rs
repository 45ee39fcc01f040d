//! Request timing and structured request/response logging
//!
//! Wraps the rest of the chain, so the measured duration covers validation,
//! rate limiting, screening and the handler.

use super::error_boundary::{format_process_time, PROCESS_TIME_HEADER};
use super::trace::sanitize_uri;
use super::RequestContext;
use crate::config::RequestLoggingConfig;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;

const MASK: &str = "***";

#[derive(Debug, Clone)]
pub struct RequestLogging {
    config: Arc<RequestLoggingConfig>,
}

impl RequestLogging {
    pub fn new(config: RequestLoggingConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Header map rendered for logs, sensitive values masked.
    pub fn masked_headers(&self, headers: &HeaderMap) -> Vec<(String, String)> {
        headers
            .iter()
            .map(|(name, value)| {
                let name = name.as_str().to_string();
                let value = if self.config.sensitive_headers.contains(&name) {
                    MASK.to_string()
                } else {
                    value.to_str().unwrap_or("<binary>").to_string()
                };
                (name, value)
            })
            .collect()
    }
}

pub async fn request_logging(
    State(logging): State<RequestLogging>,
    request: Request,
    next: Next,
) -> Response {
    let started = request
        .extensions()
        .get::<Arc<RequestContext>>()
        .map(|ctx| ctx.started_at())
        .unwrap_or_else(Instant::now);
    let client = request
        .extensions()
        .get::<Arc<RequestContext>>()
        .map(|ctx| ctx.client_key().to_string())
        .unwrap_or_default();
    let method = request.method().to_string();
    let raw_path = request.uri().path().to_string();
    let path = normalize_path(&raw_path);
    let quiet = logging.config.exclude_paths.contains(&raw_path);

    if !quiet {
        tracing::info!(
            method = %method,
            uri = %sanitize_uri(request.uri()),
            client = %client,
            headers = ?logging.masked_headers(request.headers()),
            "Request received"
        );
    }

    let mut response = next.run(request).await;

    let elapsed = started.elapsed();
    let status = response.status().as_u16();
    if let Ok(value) = HeaderValue::from_str(&format_process_time(elapsed)) {
        response.headers_mut().insert(PROCESS_TIME_HEADER, value);
    }

    counter!(
        "portico_http_requests_total",
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "portico_http_request_duration_seconds",
        "method" => method.clone(),
        "path" => path
    )
    .record(elapsed.as_secs_f64());

    if quiet {
        return response;
    }

    let duration_ms = elapsed.as_millis() as u64;
    tracing::info!(
        method = %method,
        path = %raw_path,
        status,
        duration_ms,
        "Request completed"
    );
    if elapsed > logging.config.slow_request_threshold {
        tracing::warn!(
            method = %method,
            path = %raw_path,
            duration_ms,
            threshold_ms = logging.config.slow_request_threshold.as_millis() as u64,
            "Slow request"
        );
    }
    response
}

/// Collapse UUID-like path segments to `{id}` to prevent high-cardinality labels.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if looks_like_uuid(seg) {
                "{id}"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn looks_like_uuid(s: &str) -> bool {
    s.len() == 36 && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(config: RequestLoggingConfig) -> Router {
        Router::new()
            .route("/work", get(|| async { "done" }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    "done"
                }),
            )
            .route("/health", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                RequestLogging::new(config),
                request_logging,
            ))
    }

    async fn get_uri(app: Router, uri: &str) -> Response {
        app.oneshot(
            axum::http::Request::builder()
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_process_time_header_stamped() {
        let response = get_uri(app(RequestLoggingConfig::default()), "/work").await;

        assert_eq!(response.status(), StatusCode::OK);
        let value = response.headers().get(PROCESS_TIME_HEADER).unwrap();
        assert!(value.to_str().unwrap().ends_with('s'));
    }

    #[tokio::test]
    async fn test_process_time_covers_handler() {
        let config = RequestLoggingConfig {
            slow_request_threshold: Duration::from_millis(5),
            ..Default::default()
        };
        let response = get_uri(app(config), "/slow").await;

        let value = response.headers().get(PROCESS_TIME_HEADER).unwrap();
        let secs: f64 = value.to_str().unwrap().trim_end_matches('s').parse().unwrap();
        assert!(secs >= 0.02);
    }

    #[tokio::test]
    async fn test_excluded_path_still_timed() {
        let response = get_uri(app(RequestLoggingConfig::default()), "/health").await;
        assert!(response.headers().get(PROCESS_TIME_HEADER).is_some());
    }

    #[test]
    fn test_sensitive_headers_masked() {
        let logging = RequestLogging::new(RequestLoggingConfig::default());
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        headers.insert("accept", "application/json".parse().unwrap());

        let masked = logging.masked_headers(&headers);
        assert!(masked.contains(&("authorization".to_string(), "***".to_string())));
        assert!(masked.contains(&("accept".to_string(), "application/json".to_string())));
    }

    #[test]
    fn test_normalize_path_with_uuid() {
        let path = "/api/users/550e8400-e29b-41d4-a716-446655440000/profile";
        assert_eq!(normalize_path(path), "/api/users/{id}/profile");
    }

    #[test]
    fn test_normalize_path_without_uuid() {
        assert_eq!(normalize_path("/api/auth/login"), "/api/auth/login");
    }

    #[test]
    fn test_looks_like_uuid() {
        assert!(looks_like_uuid("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!looks_like_uuid("users"));
        assert!(!looks_like_uuid(""));
    }
}
