//! Failure classification into the wire envelope

use super::{codes, AppError, ErrorEnvelope};
use axum::http::StatusCode;
use serde_json::json;

/// Taxonomy branch a failure falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Application,
    Validation,
    Storage,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Application => "application",
            ErrorKind::Validation => "validation",
            ErrorKind::Storage => "storage",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Storage and unknown failures count towards error alerts.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, ErrorKind::Storage | ErrorKind::Unknown)
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Unauthorized(_)
            | AppError::Forbidden(_)
            | AppError::NotFound(_)
            | AppError::Conflict(_)
            | AppError::BadRequest(_)
            | AppError::Business { .. } => ErrorKind::Application,
            AppError::Validation { .. } => ErrorKind::Validation,
            AppError::Storage(_) => ErrorKind::Storage,
            AppError::Internal(_) | AppError::Panic(_) => ErrorKind::Unknown,
        }
    }
}

/// Pure mapping from a failure to `(status, envelope)`.
///
/// Internal detail (storage messages, error chains, panic payloads) is only
/// exposed when `debug` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorTranslator {
    debug: bool,
}

impl ErrorTranslator {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    pub fn translate(&self, error: &AppError, trace_id: Option<&str>) -> (StatusCode, ErrorEnvelope) {
        let envelope = match error {
            AppError::Unauthorized(msg) => ErrorEnvelope::new(codes::AUTHENTICATION, msg.clone()),
            AppError::Forbidden(msg) => ErrorEnvelope::new(codes::AUTHORIZATION, msg.clone()),
            AppError::NotFound(msg) => ErrorEnvelope::new(codes::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => ErrorEnvelope::new(codes::CONFLICT, msg.clone()),
            AppError::BadRequest(msg) => ErrorEnvelope::new(codes::BUSINESS, msg.clone()),
            AppError::Business {
                code,
                message,
                details,
                ..
            } => ErrorEnvelope {
                error_code: *code,
                message: message.clone(),
                details: details.clone(),
                trace_id: None,
            },
            AppError::Validation { message, details } => ErrorEnvelope {
                error_code: codes::VALIDATION,
                message: message.clone(),
                details: details.clone(),
                trace_id: None,
            },
            AppError::Storage(e) => {
                let envelope = ErrorEnvelope::new(codes::STORAGE, "Database error occurred");
                if self.debug {
                    envelope.with_details(json!(e.to_string()))
                } else {
                    envelope
                }
            }
            AppError::Internal(e) => {
                let envelope = ErrorEnvelope::new(codes::INTERNAL, "Internal server error");
                if self.debug {
                    let chain: Vec<String> = e.chain().map(|c| c.to_string()).collect();
                    envelope.with_details(json!({
                        "error": e.to_string(),
                        "chain": chain,
                        "backtrace": e.backtrace().to_string(),
                    }))
                } else {
                    envelope
                }
            }
            AppError::Panic(payload) => {
                let envelope = ErrorEnvelope::new(codes::INTERNAL, "Internal server error");
                if self.debug {
                    envelope.with_details(json!({ "error": payload, "panic": true }))
                } else {
                    envelope
                }
            }
        };

        (
            error.status(),
            envelope.with_trace_id(trace_id.map(String::from)),
        )
    }
}
