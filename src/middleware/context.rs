//! Per-request correlation state
//!
//! The context stage allocates a [`RequestContext`] for every request and
//! stores it (behind an `Arc`) in the request extensions. Handlers can take it
//! with `Extension<Arc<RequestContext>>`.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug)]
pub struct RequestContext {
    id: String,
    started_at: Instant,
    client_key: String,
    subject: OnceLock<String>,
}

impl RequestContext {
    pub fn new(client_key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Instant::now(),
            client_key: client_key.into(),
            subject: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn client_key(&self) -> &str {
        &self.client_key
    }

    /// Authenticated principal, once resolved
    pub fn subject(&self) -> Option<&str> {
        self.subject.get().map(String::as_str)
    }

    /// Record the authenticated principal. The first value wins; returns
    /// `false` if a subject was already set.
    pub fn set_subject(&self, subject: impl Into<String>) -> bool {
        self.subject.set(subject.into()).is_ok()
    }
}

/// Slot the outermost boundary reads the request id from, even when the
/// inner chain never produced a response.
#[derive(Debug, Clone, Default)]
pub struct TraceSlot(Arc<OnceLock<String>>);

impl TraceSlot {
    pub fn fill(&self, id: &str) {
        let _ = self.0.set(id.to_string());
    }

    pub fn get(&self) -> Option<String> {
        self.0.get().cloned()
    }
}

/// How the client key is derived.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientKeyPolicy {
    /// Prefer `X-Forwarded-For` / `X-Real-IP` over the socket peer address
    pub trust_forwarded_for: bool,
}

/// Client key for rate limiting: peer IP, or the proxy headers when trusted.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, policy: ClientKeyPolicy) -> String {
    if policy.trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            });
        if let Some(ip) = forwarded {
            return ip;
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn request_context(
    State(policy): State<ClientKeyPolicy>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let context = Arc::new(RequestContext::new(client_key(
        request.headers(),
        peer,
        policy,
    )));

    if let Some(slot) = request.extensions().get::<TraceSlot>() {
        slot.fill(context.id());
    }
    request.extensions_mut().insert(context.clone());

    let span = tracing::info_span!("request", request_id = %context.id());
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(context.id()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
