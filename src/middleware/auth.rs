//! Bearer token authentication extractor

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use std::sync::Arc;

use super::RequestContext;
use crate::error::AppError;
use crate::jwt::TokenClaims;
use crate::state::HasTokens;

/// Authenticated principal resolved from an access token
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// Subject (`sub` claim) of the verified token
    pub subject: String,
    pub claims: TokenClaims,
}

/// Axum extractor for authenticated users
///
/// Reads `Authorization: Bearer <token>`, verifies it as an access token and
/// records the subject on the request's [`RequestContext`]. Every failure is
/// the same 401 so callers cannot tell a missing token from an expired one.
///
/// # Example
///
/// ```ignore
/// async fn me(auth: AuthUser) -> String {
///     auth.subject
/// }
/// ```
impl<S> FromRequestParts<S> for AuthUser
where
    S: HasTokens,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::Unauthorized("Not authenticated".to_string()))?;

        let claims = state.token_service().verify_access(bearer.token()).map_err(|e| {
            tracing::debug!(error = %e, "Bearer token rejected");
            AppError::Unauthorized("Could not validate credentials".to_string())
        })?;

        if let Some(ctx) = parts.extensions.get::<Arc<RequestContext>>() {
            ctx.set_subject(claims.sub.clone());
        }

        Ok(Self {
            subject: claims.sub.clone(),
            claims,
        })
    }
}
