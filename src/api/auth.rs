//! Authentication API handlers

use super::{reject_json, ValidatedJson};
use crate::domain::{
    LoginInput, PasswordForm, RefreshInput, RegisterInput, UpdateProfileInput, UserResponse,
};
use crate::error::{AppError, Result};
use crate::jwt::TokenPair;
use crate::middleware::AuthUser;
use crate::state::HasServices;
use axum::{
    extract::{FromRequest, Request, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Form, Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "bearer".to_string(),
            expires_in: pair.expires_in,
        }
    }
}

/// Login credentials, as JSON `{email, password}` or the OAuth2 password
/// form `username=<email>&password=...`.
#[derive(Debug, Clone)]
pub struct LoginCredentials(pub LoginInput);

impl<S> FromRequest<S> for LoginCredentials
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        let input: LoginInput = if is_form {
            let Form(form) = Form::<PasswordForm>::from_request(req, state)
                .await
                .map_err(|_| AppError::validation("Invalid login form", None))?;
            form.into()
        } else {
            let Json(input) = Json::<LoginInput>::from_request(req, state)
                .await
                .map_err(reject_json)?;
            input
        };
        input.validate()?;
        Ok(Self(input))
    }
}

/// POST /auth/register
pub async fn register<S: HasServices>(
    State(state): State<S>,
    ValidatedJson(input): ValidatedJson<RegisterInput>,
) -> Result<impl IntoResponse> {
    let user = state.auth_service().register(input).await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// POST /auth/login
pub async fn login<S: HasServices>(
    State(state): State<S>,
    LoginCredentials(input): LoginCredentials,
) -> Result<Json<TokenResponse>> {
    let pair = state.auth_service().login(input).await?;
    Ok(Json(pair.into()))
}

/// POST /auth/refresh
pub async fn refresh<S: HasServices>(
    State(state): State<S>,
    ValidatedJson(input): ValidatedJson<RefreshInput>,
) -> Result<Json<TokenResponse>> {
    let pair = state.auth_service().refresh(&input.refresh_token).await?;
    Ok(Json(pair.into()))
}

/// GET /auth/me
pub async fn me<S: HasServices>(
    State(state): State<S>,
    auth: AuthUser,
) -> Result<Json<UserResponse>> {
    let user = state.auth_service().current_user(&auth.subject).await?;
    Ok(Json(user.into()))
}

/// PUT /auth/me
pub async fn update_me<S: HasServices>(
    State(state): State<S>,
    auth: AuthUser,
    ValidatedJson(input): ValidatedJson<UpdateProfileInput>,
) -> Result<Json<UserResponse>> {
    let current = state.auth_service().current_user(&auth.subject).await?;
    let user = state
        .auth_service()
        .update_profile(current.id, input)
        .await?;
    Ok(Json(user.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(content_type: &str, body: &'static str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn test_token_response_is_bearer() {
        let response = TokenResponse::from(TokenPair {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in: 3600,
        });
        assert_eq!(response.token_type, "bearer");
        assert_eq!(response.expires_in, 3600);
    }

    #[tokio::test]
    async fn test_login_credentials_from_json() {
        let LoginCredentials(input) = LoginCredentials::from_request(
            request(
                "application/json",
                r#"{"email":"user@example.com","password":"pw"}"#,
            ),
            &(),
        )
        .await
        .unwrap();
        assert_eq!(input.email, "user@example.com");
    }

    #[tokio::test]
    async fn test_login_credentials_from_password_form() {
        let LoginCredentials(input) = LoginCredentials::from_request(
            request(
                "application/x-www-form-urlencoded",
                "username=user%40example.com&password=pw",
            ),
            &(),
        )
        .await
        .unwrap();
        assert_eq!(input.email, "user@example.com");
        assert_eq!(input.password, "pw");
    }

    #[tokio::test]
    async fn test_login_credentials_empty_password_rejected() {
        let result = LoginCredentials::from_request(
            request("application/json", r#"{"email":"user@example.com","password":""}"#),
            &(),
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
    }
}
