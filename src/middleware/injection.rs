//! Injection screening stage

use super::{reject, RequestContext};
use crate::config::InjectionScreenConfig;
use crate::error::{codes, ErrorEnvelope};
use crate::security::{FlattenedRequestText, InjectionScreen};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct InjectionState {
    screen: Arc<InjectionScreen>,
    config: Arc<InjectionScreenConfig>,
    max_body_bytes: usize,
}

impl InjectionState {
    pub fn new(
        screen: Arc<InjectionScreen>,
        config: InjectionScreenConfig,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            screen,
            config: Arc::new(config),
            max_body_bytes,
        }
    }
}

fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Screens query, path and (for mutating methods) body text.
///
/// The body is buffered once and handed on unchanged.
pub async fn injection_screen(
    State(state): State<InjectionState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.enabled {
        return next.run(request).await;
    }

    let exempt = &state.config.exempt_fields;
    let mut text = FlattenedRequestText::new()
        .with_query(request.uri().query().unwrap_or_default(), exempt)
        .with_path(request.uri().path());

    let request = if carries_body(request.method()) {
        let (parts, body) = request.into_parts();
        let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(_) => {
                let request = Request::from_parts(parts, Body::empty());
                return reject(
                    &request,
                    StatusCode::PAYLOAD_TOO_LARGE,
                    ErrorEnvelope::new(codes::PAYLOAD_TOO_LARGE, "Request Entity Too Large"),
                );
            }
        };
        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        text = text.with_body(content_type, &bytes, exempt);
        Request::from_parts(parts, Body::from(bytes))
    } else {
        request
    };

    let Some(detection) = state.screen.scan(&text) else {
        return next.run(request).await;
    };

    let blocked = state.config.block_suspicious;
    let client = request
        .extensions()
        .get::<Arc<RequestContext>>()
        .map(|ctx| ctx.client_key().to_string())
        .unwrap_or_default();
    tracing::warn!(
        client = %client,
        method = %request.method(),
        path = %request.uri().path(),
        part = detection.part.as_str(),
        pattern = detection.pattern,
        blocked,
        "Potential SQL injection detected"
    );
    metrics::counter!(
        "portico_injection_detected_total",
        "part" => detection.part.as_str(),
        "blocked" => blocked.to_string()
    )
    .increment(1);

    if blocked {
        return reject(
            &request,
            StatusCode::BAD_REQUEST,
            ErrorEnvelope::new(codes::INVALID_REQUEST, "Invalid request"),
        );
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn app(block: bool, hits: Arc<AtomicUsize>) -> Router {
        let state = InjectionState::new(
            Arc::new(InjectionScreen::new().unwrap()),
            InjectionScreenConfig {
                block_suspicious: block,
                ..Default::default()
            },
            1024,
        );
        Router::new()
            .route(
                "/echo",
                post(move |body: String| {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        body
                    }
                })
                .get(|| async { "ok" }),
            )
            .layer(axum::middleware::from_fn_with_state(state, injection_screen))
    }

    #[tokio::test]
    async fn test_suspicious_query_blocked_before_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(true, hits.clone())
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/echo?q=%27%20OR%201%3D1%20--")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_body_is_forwarded_intact() {
        let hits = Arc::new(AtomicUsize::new(0));
        let body = r#"{"email":"user@example.com","password":"p--w#rd"}"#;
        let response = app(true, hits.clone())
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/echo")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let echoed = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&echoed[..], body.as_bytes());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_log_only_mode_lets_request_through() {
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(false, hits.clone())
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/echo")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"name":"1; DROP TABLE users;"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let response = app(true, Arc::new(AtomicUsize::new(0)))
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/echo")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(vec![b'a'; 2048]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
