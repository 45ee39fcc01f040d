//! Canonical stage order
//!
//! Outer to inner:
//! 1. error boundary
//! 2. request context (request id, client key)
//! 3. timing and request logging
//! 4. content-type / payload-size validation
//! 5. rate limiting
//! 6. injection screening
//! 7. security headers
//! 8. handler
//!
//! Timing sits just inside the context stage so the logged duration and the
//! `X-Process-Time` header cover every stage that can reject.

use super::{
    error_boundary, injection_screen, rate_limit, request_context, request_logging,
    request_validation, security_headers, BoundaryState, ClientKeyPolicy, ErrorAlerter,
    InjectionState, RateLimitState, RequestLogging, SecurityHeaders,
};
use crate::config::{Config, RequestValidationConfig};
use crate::error::ErrorTranslator;
use crate::ratelimit::RateLimiter;
use crate::security::InjectionScreen;
use anyhow::{Context, Result};
use axum::{middleware::from_fn_with_state, Router};
use std::sync::Arc;
use tower::ServiceBuilder;

/// Pre-built state for every stage, assembled once at startup.
#[derive(Clone)]
pub struct Pipeline {
    boundary: BoundaryState,
    client_keys: ClientKeyPolicy,
    logging: RequestLogging,
    validation: Arc<RequestValidationConfig>,
    rate_limit: RateLimitState,
    injection: InjectionState,
    security_headers: Arc<SecurityHeaders>,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        limiter: Arc<dyn RateLimiter>,
        screen: Arc<InjectionScreen>,
        alerter: Arc<ErrorAlerter>,
    ) -> Result<Self> {
        let security_headers = Arc::new(
            SecurityHeaders::new(&config.security_headers)
                .context("invalid security header configuration")?,
        );

        Ok(Self {
            boundary: BoundaryState::new(
                ErrorTranslator::new(config.debug),
                alerter,
                security_headers.clone(),
            ),
            client_keys: ClientKeyPolicy {
                trust_forwarded_for: config.rate_limit.trust_forwarded_for,
            },
            logging: RequestLogging::new(config.request_logging.clone()),
            validation: Arc::new(config.request_validation.clone()),
            rate_limit: RateLimitState::new(config.rate_limit.clone(), limiter),
            injection: InjectionState::new(
                screen,
                config.injection_screen.clone(),
                config.request_validation.max_body_bytes,
            ),
            security_headers,
        })
    }

    /// Wrap every route of `router` in the full stage chain.
    pub fn apply<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        // ServiceBuilder layers run top to bottom on the way in.
        router.layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(self.boundary.clone(), error_boundary))
                .layer(from_fn_with_state(self.client_keys, request_context))
                .layer(from_fn_with_state(self.logging.clone(), request_logging))
                .layer(from_fn_with_state(
                    self.validation.clone(),
                    request_validation,
                ))
                .layer(from_fn_with_state(self.rate_limit.clone(), rate_limit))
                .layer(from_fn_with_state(self.injection.clone(), injection_screen))
                .layer(from_fn_with_state(
                    self.security_headers.clone(),
                    security_headers,
                )),
        )
    }
}
