//! JWT token handling
//!
//! [`TokenCodec`] signs and decodes claims; [`TokenService`] owns the
//! access/refresh lifecycle on top of it.

pub mod service;

pub use service::{RefreshPolicy, RevocationList, TokenPair, TokenService};

use crate::config::JwtConfig;
use crate::error::AppError;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Token type discriminator (prevents token confusion attacks)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims carried by both access and refresh tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
    pub token_type: TokenType,
    /// Unique token id, consulted by refresh rotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

#[derive(Error, Debug)]
pub enum TokenError {
    /// Bad signature, malformed payload, wrong type, expired or revoked.
    #[error("invalid token")]
    InvalidToken,

    #[error("token lifetime must be positive, got {0}s")]
    InvalidTtl(i64),

    #[error("failed to load JWT key: {0}")]
    Key(String),

    #[error("failed to encode token: {0}")]
    Encoding(String),
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidToken => {
                AppError::Unauthorized("Could not validate credentials".to_string())
            }
            other => AppError::Internal(other.into()),
        }
    }
}

/// Signs and decodes [`TokenClaims`].
///
/// Decoding checks the signature, algorithm, issuer and payload shape. Expiry
/// is left to the caller, which owns the clock.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
}

impl TokenCodec {
    pub fn new(config: &JwtConfig) -> Result<Self, TokenError> {
        let algorithm = if config.private_key_pem.is_some() {
            Algorithm::RS256
        } else {
            Algorithm::HS256
        };
        let encoding_key = match config.private_key_pem.as_ref() {
            Some(private_key) => EncodingKey::from_rsa_pem(private_key.as_bytes())
                .map_err(|e| TokenError::Key(e.to_string()))?,
            None => EncodingKey::from_secret(config.secret.as_bytes()),
        };
        let decoding_key = match (config.public_key_pem.as_ref(), config.private_key_pem.as_ref()) {
            (Some(public_key), _) => DecodingKey::from_rsa_pem(public_key.as_bytes())
                .map_err(|e| TokenError::Key(e.to_string()))?,
            (None, Some(_)) => {
                return Err(TokenError::Key(
                    "JWT_PUBLIC_KEY is required when JWT_PRIVATE_KEY is set".to_string(),
                ))
            }
            (None, None) => DecodingKey::from_secret(config.secret.as_bytes()),
        };
        if algorithm == Algorithm::HS256 && config.secret.is_empty() {
            return Err(TokenError::Key("JWT secret must not be empty".to_string()));
        }

        Ok(Self {
            encoding_key,
            decoding_key,
            algorithm,
            issuer: config.issuer.clone(),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn encode(&self, claims: &TokenClaims) -> Result<String, TokenError> {
        let header = Header::new(self.algorithm);
        encode(&header, claims, &self.encoding_key).map_err(|e| TokenError::Encoding(e.to_string()))
    }

    pub fn decode(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::from(["sub".to_string(), "iss".to_string()]);
        validation.set_issuer(&[&self.issuer]);

        decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(reason = %e, "Token rejected by codec");
                TokenError::InvalidToken
            })
    }
}
