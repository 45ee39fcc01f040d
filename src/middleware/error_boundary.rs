//! Outermost pipeline stage
//!
//! Catches panics from everything inside it, turns a pending [`AppError`]
//! into exactly one [`ErrorEnvelope`] and normalises framework error
//! responses (unknown route, wrong method, extractor rejections) that are not
//! JSON. Whatever path a request took, the response leaves here with the
//! request id, process time and security headers attached.

use super::{SecurityHeaders, TraceSlot, REQUEST_ID_HEADER};
use crate::config::ErrorAlertConfig;
use crate::error::{codes, AppError, ErrorEnvelope, ErrorKind, ErrorTranslator, PendingError};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Raises an error-level alert when unexpected failures pile up.
#[derive(Debug)]
pub struct ErrorAlerter {
    threshold: u64,
    interval: Duration,
    state: Mutex<AlertState>,
}

#[derive(Debug, Default)]
struct AlertState {
    count: u64,
    last_alert: Option<Instant>,
}

impl ErrorAlerter {
    pub fn new(config: &ErrorAlertConfig) -> Self {
        Self {
            threshold: config.threshold.max(1),
            interval: Duration::from_secs(config.interval_secs),
            state: Mutex::new(AlertState::default()),
        }
    }

    /// Count one failure. Returns `true` when this call raised an alert.
    pub fn record(&self, kind: ErrorKind) -> bool {
        if !kind.is_unexpected() {
            return false;
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.count += 1;

        let due = state
            .last_alert
            .map_or(true, |at| at.elapsed() >= self.interval);
        if state.count < self.threshold || !due {
            return false;
        }

        tracing::error!(
            error_count = state.count,
            interval_secs = self.interval.as_secs(),
            "error alert triggered"
        );
        state.count = 0;
        state.last_alert = Some(Instant::now());
        true
    }

    pub fn pending(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).count
    }
}

/// Everything the boundary needs, built once at startup.
#[derive(Clone)]
pub struct BoundaryState {
    translator: ErrorTranslator,
    alerter: Arc<ErrorAlerter>,
    headers: Arc<SecurityHeaders>,
}

impl BoundaryState {
    pub fn new(
        translator: ErrorTranslator,
        alerter: Arc<ErrorAlerter>,
        headers: Arc<SecurityHeaders>,
    ) -> Self {
        Self {
            translator,
            alerter,
            headers,
        }
    }

    fn report(&self, error: &AppError, trace_id: Option<&str>, method: &str, path: &str) {
        let kind = error.kind();
        let trace_id = trace_id.unwrap_or("-");
        match kind {
            ErrorKind::Validation => {
                tracing::warn!(trace_id, method, path, error = %error, "Validation error")
            }
            ErrorKind::Application => {
                tracing::error!(trace_id, method, path, error = %error, "Application error")
            }
            ErrorKind::Storage => {
                tracing::error!(trace_id, method, path, error = ?error, "Storage error")
            }
            ErrorKind::Unknown => {
                tracing::error!(trace_id, method, path, error = ?error, "Unhandled error")
            }
        }
        metrics::counter!("portico_errors_total", "kind" => kind.as_str()).increment(1);
        self.alerter.record(kind);
    }
}

pub async fn error_boundary(
    State(state): State<BoundaryState>,
    mut request: Request,
    next: Next,
) -> Response {
    let slot = TraceSlot::default();
    request.extensions_mut().insert(slot.clone());

    let started = Instant::now();
    let hsts = state.headers.wants_hsts(request.headers());
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let mut response = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => AppError::Panic(panic_message(&*payload)).into_response(),
    };
    let trace_id = slot.get();

    if let Some(PendingError(error)) = response.extensions_mut().remove::<PendingError>() {
        state.report(&error, trace_id.as_deref(), &method, &path);
        let (status, envelope) = state.translator.translate(&error, trace_id.as_deref());
        response = replace_body(response, status, envelope);
    } else if is_unshaped_error(&response) {
        let status = response.status();
        let envelope = generic_envelope(status).with_trace_id(trace_id.clone());
        response = replace_body(response, status, envelope);
    }

    let headers = response.headers_mut();
    state.headers.apply(headers, hsts);
    if let Some(id) = trace_id.as_deref() {
        if !headers.contains_key(REQUEST_ID_HEADER) {
            if let Ok(value) = HeaderValue::from_str(id) {
                headers.insert(REQUEST_ID_HEADER, value);
            }
        }
    }
    if !headers.contains_key(PROCESS_TIME_HEADER) {
        if let Ok(value) = HeaderValue::from_str(&format_process_time(started.elapsed())) {
            headers.insert(PROCESS_TIME_HEADER, value);
        }
    }
    if response.status() == StatusCode::UNAUTHORIZED {
        response
            .headers_mut()
            .entry(header::WWW_AUTHENTICATE)
            .or_insert(HeaderValue::from_static("Bearer"));
    }
    response
}

pub fn format_process_time(elapsed: Duration) -> String {
    format!("{:.3}s", elapsed.as_secs_f64())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// An error status whose body is not already JSON.
fn is_unshaped_error(response: &Response) -> bool {
    let status = response.status();
    if !status.is_client_error() && !status.is_server_error() {
        return false;
    }
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    !content_type.contains("json")
}

/// Keeps the inner response's headers and swaps in the envelope body.
fn replace_body(response: Response, status: StatusCode, envelope: ErrorEnvelope) -> Response {
    let (mut parts, _) = response.into_parts();
    let (_, body) = envelope.into_response_with(status).into_parts();
    parts.status = status;
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Response::from_parts(parts, body)
}

fn generic_envelope(status: StatusCode) -> ErrorEnvelope {
    let (code, message) = match status {
        StatusCode::BAD_REQUEST => (codes::INVALID_REQUEST, "Invalid request"),
        StatusCode::UNAUTHORIZED => (codes::AUTHENTICATION, "Authentication required"),
        StatusCode::FORBIDDEN => (codes::AUTHORIZATION, "Access denied"),
        StatusCode::NOT_FOUND => (codes::NOT_FOUND, "Not found"),
        StatusCode::METHOD_NOT_ALLOWED => (codes::METHOD_NOT_ALLOWED, "Method not allowed"),
        StatusCode::CONFLICT => (codes::CONFLICT, "Resource conflict"),
        StatusCode::PAYLOAD_TOO_LARGE => (codes::PAYLOAD_TOO_LARGE, "Request Entity Too Large"),
        StatusCode::UNSUPPORTED_MEDIA_TYPE => {
            (codes::UNSUPPORTED_MEDIA_TYPE, "Unsupported Media Type")
        }
        StatusCode::UNPROCESSABLE_ENTITY => (codes::VALIDATION, "Validation error"),
        StatusCode::TOO_MANY_REQUESTS => (codes::RATE_LIMITED, "Too Many Requests"),
        _ if status.is_client_error() => (codes::INVALID_REQUEST, "Invalid request"),
        _ => (codes::INTERNAL, "Internal server error"),
    };
    ErrorEnvelope::new(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityHeadersConfig;
    use crate::middleware::{request_context, ClientKeyPolicy};
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    fn state(debug: bool) -> BoundaryState {
        BoundaryState::new(
            ErrorTranslator::new(debug),
            Arc::new(ErrorAlerter::new(&ErrorAlertConfig::default())),
            Arc::new(SecurityHeaders::new(&SecurityHeadersConfig::default()).unwrap()),
        )
    }

    async fn boom() -> crate::error::Result<&'static str> {
        Err(anyhow::anyhow!("disk on fire").into())
    }

    async fn explode() -> &'static str {
        panic!("handler exploded")
    }

    async fn locked() -> crate::error::Result<&'static str> {
        Err(AppError::Unauthorized("Could not validate credentials".into()))
    }

    fn app(debug: bool) -> Router {
        Router::new()
            .route("/boom", get(boom))
            .route("/explode", get(explode))
            .route("/locked", get(locked))
            .route("/ok", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                ClientKeyPolicy::default(),
                request_context,
            ))
            .layer(axum::middleware::from_fn_with_state(state(debug), error_boundary))
    }

    async fn call(app: Router, uri: &str) -> (Response, ErrorEnvelope) {
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let envelope = serde_json::from_slice(&bytes).unwrap();
        (Response::from_parts(parts, Body::empty()), envelope)
    }

    #[tokio::test]
    async fn test_internal_error_becomes_single_envelope() {
        let (response, envelope) = call(app(false), "/boom").await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(envelope.error_code, codes::INTERNAL);
        assert_eq!(envelope.details, None);
        let request_id = response.headers().get(REQUEST_ID_HEADER).unwrap();
        assert_eq!(envelope.trace_id.as_deref(), request_id.to_str().ok());
    }

    #[tokio::test]
    async fn test_panic_is_caught_and_translated() {
        let (response, envelope) = call(app(false), "/explode").await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(envelope.error_code, codes::INTERNAL);
        assert!(envelope.trace_id.is_some());
        assert!(response.headers().get(REQUEST_ID_HEADER).is_some());
        assert!(response.headers().get(PROCESS_TIME_HEADER).is_some());
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    }

    #[tokio::test]
    async fn test_panic_detail_only_in_debug() {
        let (_, envelope) = call(app(true), "/explode").await;
        assert_eq!(envelope.details.unwrap()["error"], "handler exploded");
    }

    #[tokio::test]
    async fn test_unknown_route_normalised() {
        let (response, envelope) = call(app(false), "/nowhere").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(envelope.error_code, codes::NOT_FOUND);
        assert_eq!(envelope.message, "Not found");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_unauthorized_carries_www_authenticate() {
        let (response, envelope) = call(app(false), "/locked").await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(envelope.error_code, codes::AUTHENTICATION);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }

    #[tokio::test]
    async fn test_success_passes_with_headers() {
        let response = app(false)
            .oneshot(
                axum::http::Request::builder()
                    .uri("/ok")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(REQUEST_ID_HEADER).is_some());
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
    }

    #[test]
    fn test_alerter_fires_at_threshold_then_waits_for_interval() {
        let alerter = ErrorAlerter::new(&ErrorAlertConfig {
            threshold: 3,
            interval_secs: 3600,
        });

        assert!(!alerter.record(ErrorKind::Unknown));
        assert!(!alerter.record(ErrorKind::Storage));
        assert!(alerter.record(ErrorKind::Unknown));
        assert_eq!(alerter.pending(), 0);

        for _ in 0..5 {
            assert!(!alerter.record(ErrorKind::Unknown));
        }
        assert_eq!(alerter.pending(), 5);
    }

    #[test]
    fn test_alerter_ignores_expected_failures() {
        let alerter = ErrorAlerter::new(&ErrorAlertConfig {
            threshold: 1,
            interval_secs: 0,
        });
        assert!(!alerter.record(ErrorKind::Validation));
        assert!(!alerter.record(ErrorKind::Application));
        assert_eq!(alerter.pending(), 0);
        assert!(alerter.record(ErrorKind::Unknown));
    }

    #[test]
    fn test_process_time_format() {
        assert_eq!(format_process_time(Duration::from_millis(1234)), "1.234s");
    }
}
