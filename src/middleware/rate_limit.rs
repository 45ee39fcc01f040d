//! Rate limiting middleware
//!
//! Keys requests by client identity and path, checks them against the
//! configured [`RateLimiter`] and answers 429 with `Retry-After` once the
//! window is full. Throttling is an ordinary outcome here, not an error.

use super::{reject, RequestContext};
use crate::config::RateLimitConfig;
use crate::error::{codes, ErrorEnvelope};
use crate::ratelimit::RateLimiter;
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Rate limit state shared across requests
#[derive(Clone)]
pub struct RateLimitState {
    config: Arc<RateLimitConfig>,
    limiter: Arc<dyn RateLimiter>,
}

impl RateLimitState {
    pub fn new(config: RateLimitConfig, limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            config: Arc::new(config),
            limiter,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_secs)
    }
}

/// Rate limiting middleware function
pub async fn rate_limit(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !state.is_enabled() || state.config.is_exempt(&path) {
        return next.run(request).await;
    }

    let client = request
        .extensions()
        .get::<Arc<RequestContext>>()
        .map(|ctx| ctx.client_key().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let limit = state.config.limit_for(&path);
    let key = format!("{}:{}", client, path);

    let decision = state.limiter.allow(&key, limit, state.window()).await;

    if !decision.permitted {
        tracing::warn!(
            client = %client,
            path = %path,
            count = decision.count,
            limit,
            "Rate limit exceeded"
        );
        metrics::counter!("portico_rate_limit_throttled_total", "path" => path).increment(1);

        let mut response = reject(
            &request,
            StatusCode::TOO_MANY_REQUESTS,
            ErrorEnvelope::new(codes::RATE_LIMITED, "Too Many Requests").with_details(json!({
                "limit": limit,
                "window_secs": state.config.window_secs,
            })),
        );
        let headers = response.headers_mut();
        headers.insert(header::RETRY_AFTER, HeaderValue::from(state.config.window_secs));
        headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
        headers.insert(REMAINING_HEADER, HeaderValue::from(0u64));
        return response;
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining()));
    response
}
