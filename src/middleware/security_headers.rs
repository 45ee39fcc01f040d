//! Security headers middleware
//!
//! Adds standard security headers to all responses to protect against
//! common web vulnerabilities like XSS, clickjacking, and content sniffing.
//! Headers are set, never appended, so applying them twice is harmless; the
//! error boundary re-applies them to responses produced outside this stage.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::config::SecurityHeadersConfig;

/// Pre-built header values for one configuration.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    fixed: Vec<(HeaderName, HeaderValue)>,
    hsts: Option<HeaderValue>,
    hsts_https_only: bool,
    hsts_trust_x_forwarded_proto: bool,
}

impl SecurityHeaders {
    pub fn new(config: &SecurityHeadersConfig) -> Result<Self, header::InvalidHeaderValue> {
        let fixed = vec![
            // Prevent MIME type sniffing
            (
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ),
            // Prevent clickjacking
            (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
            // XSS protection (legacy but still useful for older browsers)
            (
                header::X_XSS_PROTECTION,
                HeaderValue::from_static("1; mode=block"),
            ),
            (
                header::CONTENT_SECURITY_POLICY,
                HeaderValue::from_str(&config.content_security_policy)?,
            ),
            (
                header::REFERRER_POLICY,
                HeaderValue::from_static("strict-origin-when-cross-origin"),
            ),
            (
                HeaderName::from_static("permissions-policy"),
                HeaderValue::from_str(&config.permissions_policy)?,
            ),
        ];

        let hsts = if config.hsts_enabled {
            let mut value = format!("max-age={}", config.hsts_max_age_secs);
            if config.hsts_include_subdomains {
                value.push_str("; includeSubDomains");
            }
            if config.hsts_preload {
                value.push_str("; preload");
            }
            Some(HeaderValue::from_str(&value)?)
        } else {
            None
        };

        Ok(Self {
            fixed,
            hsts,
            hsts_https_only: config.hsts_https_only,
            hsts_trust_x_forwarded_proto: config.hsts_trust_x_forwarded_proto,
        })
    }

    /// Whether a request with these headers should receive HSTS.
    pub fn wants_hsts(&self, request_headers: &HeaderMap) -> bool {
        if self.hsts.is_none() {
            false
        } else if !self.hsts_https_only {
            true
        } else if self.hsts_trust_x_forwarded_proto {
            request_headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.eq_ignore_ascii_case("https"))
                .unwrap_or(false)
        } else {
            false
        }
    }

    pub fn apply(&self, headers: &mut HeaderMap, hsts: bool) {
        for (name, value) in &self.fixed {
            headers.insert(name.clone(), value.clone());
        }
        // Only emit HSTS for HTTPS responses when configured that way. Sending
        // it on plain HTTP can cause long-lived usability issues in browsers.
        if hsts {
            if let Some(value) = &self.hsts {
                headers.insert(header::STRICT_TRANSPORT_SECURITY, value.clone());
            }
        }
    }
}

/// Security headers middleware function
pub async fn security_headers(
    State(headers): State<Arc<SecurityHeaders>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // Decide before `request` is moved into `next.run`.
    let hsts = headers.wants_hsts(request.headers());
    let mut response = next.run(request).await;
    headers.apply(response.headers_mut(), hsts);
    response
}
