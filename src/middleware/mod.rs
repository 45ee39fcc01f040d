//! HTTP middleware for Portico Core
//!
//! Every cross-cutting concern is one stage of the pipeline assembled in
//! [`pipeline::Pipeline::apply`]:
//! - Error boundary (panics, error translation, header guarantees)
//! - Request context and request logging
//! - Request validation, rate limiting and injection screening
//! - Security headers
//! - Bearer token authentication (`AuthUser` extractor)

pub mod auth;
pub mod context;
pub mod error_boundary;
pub mod injection;
pub mod pipeline;
pub mod rate_limit;
pub mod request_logging;
pub mod request_validation;
pub mod security_headers;
pub mod trace;

pub use auth::AuthUser;
pub use context::{request_context, ClientKeyPolicy, RequestContext, TraceSlot, REQUEST_ID_HEADER};
pub use error_boundary::{error_boundary, BoundaryState, ErrorAlerter, PROCESS_TIME_HEADER};
pub use injection::{injection_screen, InjectionState};
pub use rate_limit::{rate_limit, RateLimitState};
pub use request_logging::{request_logging, RequestLogging};
pub use request_validation::request_validation;
pub use security_headers::{security_headers, SecurityHeaders};

use crate::error::ErrorEnvelope;
use axum::{extract::Request, http::StatusCode, response::Response};
use std::sync::Arc;

/// Short-circuit a request with an envelope carrying its trace id.
pub(crate) fn reject(request: &Request, status: StatusCode, envelope: ErrorEnvelope) -> Response {
    let trace_id = request
        .extensions()
        .get::<Arc<RequestContext>>()
        .map(|ctx| ctx.id().to_string());
    envelope.with_trace_id(trace_id).into_response_with(status)
}
