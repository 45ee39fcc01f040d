//! Content-type and payload-size validation

use super::reject;
use crate::config::RequestValidationConfig;
use crate::error::{codes, ErrorEnvelope};
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Rejects unsupported media types (415) and declared bodies over the limit
/// (413) before anything reads the body.
pub async fn request_validation(
    State(config): State<Arc<RequestValidationConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let media_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if !media_type.is_empty() && !config.allowed_content_types.contains(&media_type) {
        tracing::warn!(content_type = %media_type, "Unsupported media type");
        return reject(
            &request,
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorEnvelope::new(codes::UNSUPPORTED_MEDIA_TYPE, "Unsupported Media Type"),
        );
    }

    if let Some(raw) = request.headers().get(header::CONTENT_LENGTH) {
        match raw.to_str().ok().and_then(|v| v.trim().parse::<usize>().ok()) {
            Some(length) if length > config.max_body_bytes => {
                tracing::warn!(
                    content_length = length,
                    max = config.max_body_bytes,
                    "Request body too large"
                );
                return reject(
                    &request,
                    StatusCode::PAYLOAD_TOO_LARGE,
                    ErrorEnvelope::new(codes::PAYLOAD_TOO_LARGE, "Request Entity Too Large"),
                );
            }
            Some(_) => {}
            None => {
                return reject(
                    &request,
                    StatusCode::BAD_REQUEST,
                    ErrorEnvelope::new(codes::INVALID_REQUEST, "Invalid Content-Length header"),
                );
            }
        }
    }

    next.run(request).await
}
