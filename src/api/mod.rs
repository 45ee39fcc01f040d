//! REST API handlers and shared extractors

pub mod auth;
pub mod health;
pub mod metrics;

use crate::error::AppError;
use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

/// JSON body that has been deserialized and validated.
///
/// Parser rejections and rule violations both surface as validation errors,
/// so the client never sees the framework's plain-text rejection.
#[derive(Debug, Clone)]
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(reject_json)?;
        value.validate()?;
        Ok(Self(value))
    }
}

pub(crate) fn reject_json(rejection: JsonRejection) -> AppError {
    // Parser positions stay in the logs.
    tracing::debug!(error = %rejection.body_text(), "JSON body rejected");
    let message = match rejection {
        JsonRejection::MissingJsonContentType(_) => "Expected a JSON request body",
        _ => "Invalid request body",
    };
    AppError::validation(message, None)
}
