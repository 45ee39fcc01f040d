//! Unified error handling for Portico Core
//!
//! Handlers and services return [`AppError`]. Turning an error into a wire
//! response happens in exactly one place, the pipeline's error boundary,
//! which runs the [`ErrorTranslator`] with the request's trace id.

pub mod translator;

use crate::repository::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub use translator::{ErrorKind, ErrorTranslator};

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Stable error codes carried in [`ErrorEnvelope::error_code`].
pub mod codes {
    pub const VALIDATION: u16 = 4000;
    pub const INVALID_REQUEST: u16 = 4000;
    pub const AUTHENTICATION: u16 = 4001;
    pub const AUTHORIZATION: u16 = 4003;
    pub const NOT_FOUND: u16 = 4004;
    pub const METHOD_NOT_ALLOWED: u16 = 4005;
    pub const CONFLICT: u16 = 4009;
    pub const PAYLOAD_TOO_LARGE: u16 = 4013;
    pub const UNSUPPORTED_MEDIA_TYPE: u16 = 4015;
    pub const RATE_LIMITED: u16 = 4029;
    pub const BUSINESS: u16 = 4100;
    pub const STORAGE: u16 = 5000;
    pub const INTERNAL: u16 = 5001;
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Domain error with an explicit code and status.
    #[error("{message}")]
    Business {
        code: u16,
        status: StatusCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Storage error: {0}")]
    Storage(StoreError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Handler panicked: {0}")]
    Panic(String),
}

impl AppError {
    pub fn business(code: u16, message: impl Into<String>) -> Self {
        AppError::Business {
            code,
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        AppError::Validation {
            message: message.into(),
            details,
        }
    }

    /// HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Business { status, .. } => *status,
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Storage(_) | AppError::Internal(_) | AppError::Panic(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::Storage(other),
        }
    }
}

// Conversion from validation errors
impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let fields: serde_json::Map<String, serde_json::Value> = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let entries = errs
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "code": e.code,
                            "message": e.message.as_ref().map(|m| m.to_string()),
                        })
                    })
                    .collect();
                (field.to_string(), serde_json::Value::Array(entries))
            })
            .collect();

        AppError::validation("Validation error", Some(serde_json::Value::Object(fields)))
    }
}

/// The single wire shape of every failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error_code: u16,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub trace_id: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(error_code: u16, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
            details: None,
            trace_id: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// Render with the given status.
    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, axum::Json(self)).into_response()
    }
}

/// An error waiting in the response extensions for the error boundary.
#[derive(Clone, Debug)]
pub struct PendingError(pub Arc<AppError>);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut response = self.status().into_response();
        response
            .extensions_mut()
            .insert(PendingError(Arc::new(self)));
        response
    }
}
