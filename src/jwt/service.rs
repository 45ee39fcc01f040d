//! Access/refresh token lifecycle

use super::{TokenClaims, TokenCodec, TokenError, TokenType};
use crate::clock::Clock;
use crate::config::JwtConfig;
use crate::error::{AppError, Result};
use crate::repository::UserStore;
use chrono::Duration;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Revocation entries are pruned once the map grows past this size.
const REVOCATION_PRUNE_THRESHOLD: usize = 10_000;

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// What happens to a refresh token once it has been exchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Each refresh token is single-use; its `jti` is revoked on exchange.
    #[default]
    Rotate,
    /// Refresh tokens stay valid until they expire.
    Reuse,
}

/// Revoked token ids, each kept until the token would have expired anyway.
#[derive(Debug, Default)]
pub struct RevocationList {
    entries: DashMap<String, i64>,
}

impl RevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_revoked(&self, jti: &str) -> bool {
        self.entries.contains_key(jti)
    }

    /// Record `jti` as revoked. Returns `false` if it already was, which lets
    /// two concurrent exchanges of the same token race to a single winner.
    pub fn revoke(&self, jti: &str, expires_at: i64, now: i64) -> bool {
        if self.entries.len() > REVOCATION_PRUNE_THRESHOLD {
            self.prune(now);
        }
        match self.entries.entry(jti.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(expires_at);
                true
            }
        }
    }

    /// Drop entries whose token has expired.
    pub fn prune(&self, now: i64) {
        self.entries.retain(|_, exp| *exp > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Positive and representable as a `chrono::Duration`.
fn lifetime(secs: i64) -> std::result::Result<Duration, TokenError> {
    if secs <= 0 {
        return Err(TokenError::InvalidTtl(secs));
    }
    Duration::try_seconds(secs).ok_or(TokenError::InvalidTtl(secs))
}

/// Issues and verifies tokens against an injected clock.
pub struct TokenService {
    codec: TokenCodec,
    clock: Arc<dyn Clock>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    policy: RefreshPolicy,
    revoked: RevocationList,
}

impl TokenService {
    pub fn new(config: &JwtConfig, clock: Arc<dyn Clock>) -> std::result::Result<Self, TokenError> {
        let access_ttl = lifetime(config.access_token_ttl_secs)?;
        let refresh_ttl = lifetime(config.refresh_token_ttl_secs)?;

        Ok(Self {
            codec: TokenCodec::new(config)?,
            clock,
            access_ttl,
            refresh_ttl,
            policy: if config.rotate_refresh_tokens {
                RefreshPolicy::Rotate
            } else {
                RefreshPolicy::Reuse
            },
            revoked: RevocationList::new(),
        })
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issue_access_token(
        &self,
        subject: &str,
        ttl: Duration,
    ) -> std::result::Result<String, TokenError> {
        self.issue(subject, TokenType::Access, ttl)
    }

    pub fn issue_refresh_token(
        &self,
        subject: &str,
        ttl: Duration,
    ) -> std::result::Result<String, TokenError> {
        self.issue(subject, TokenType::Refresh, ttl)
    }

    /// Issue an access/refresh pair with the configured lifetimes.
    pub fn issue_pair(&self, subject: &str) -> std::result::Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue_access_token(subject, self.access_ttl)?,
            refresh_token: self.issue_refresh_token(subject, self.refresh_ttl)?,
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    fn issue(
        &self,
        subject: &str,
        token_type: TokenType,
        ttl: Duration,
    ) -> std::result::Result<String, TokenError> {
        if ttl <= Duration::zero() {
            return Err(TokenError::InvalidTtl(ttl.num_seconds()));
        }
        let now = self.clock.now().timestamp();
        let claims = TokenClaims {
            sub: subject.to_string(),
            iss: self.codec.issuer().to_string(),
            iat: now,
            exp: now.saturating_add(ttl.num_seconds().max(1)),
            token_type,
            jti: Some(Uuid::new_v4().to_string()),
        };
        self.codec.encode(&claims)
    }

    /// Check signature, issuer and expiry. A token is dead from `exp` on.
    pub fn verify(&self, token: &str) -> std::result::Result<TokenClaims, TokenError> {
        let claims = self.codec.decode(token)?;
        if claims.exp <= claims.iat {
            tracing::debug!(sub = %claims.sub, "Token rejected: exp not after iat");
            return Err(TokenError::InvalidToken);
        }
        let now = self.clock.now().timestamp();
        if now >= claims.exp {
            tracing::debug!(sub = %claims.sub, exp = claims.exp, now, "Token rejected: expired");
            return Err(TokenError::InvalidToken);
        }
        Ok(claims)
    }

    /// Verify and require an access token.
    pub fn verify_access(&self, token: &str) -> std::result::Result<TokenClaims, TokenError> {
        self.verify_typed(token, TokenType::Access)
    }

    /// Verify and require a refresh token that has not been exchanged yet.
    pub fn verify_refresh(&self, token: &str) -> std::result::Result<TokenClaims, TokenError> {
        let claims = self.verify_typed(token, TokenType::Refresh)?;
        if self.policy == RefreshPolicy::Rotate {
            match claims.jti.as_deref() {
                Some(jti) if !self.revoked.is_revoked(jti) => {}
                Some(_) => {
                    tracing::debug!(sub = %claims.sub, "Token rejected: refresh token already used");
                    return Err(TokenError::InvalidToken);
                }
                None => {
                    tracing::debug!(sub = %claims.sub, "Token rejected: refresh token without jti");
                    return Err(TokenError::InvalidToken);
                }
            }
        }
        Ok(claims)
    }

    fn verify_typed(
        &self,
        token: &str,
        expected: TokenType,
    ) -> std::result::Result<TokenClaims, TokenError> {
        let claims = self.verify(token)?;
        if claims.token_type != expected {
            tracing::debug!(
                sub = %claims.sub,
                expected = ?expected,
                actual = ?claims.token_type,
                "Token rejected: wrong token type"
            );
            return Err(TokenError::InvalidToken);
        }
        Ok(claims)
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// The subject must still exist and be active. Under
    /// [`RefreshPolicy::Rotate`] the presented token cannot be exchanged again.
    pub async fn refresh<S>(&self, refresh_token: &str, users: &S) -> Result<TokenPair>
    where
        S: UserStore + ?Sized,
    {
        let invalid = || AppError::Unauthorized("Invalid refresh token".to_string());

        let claims = self.verify_refresh(refresh_token).map_err(|_| invalid())?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| invalid())?;

        let user = users.find_by_id(user_id).await?.ok_or_else(invalid)?;
        if !user.is_active {
            tracing::debug!(user_id = %user.id, "Refresh denied for inactive user");
            return Err(invalid());
        }

        if self.policy == RefreshPolicy::Rotate {
            let jti = claims.jti.as_deref().ok_or_else(invalid)?;
            let now = self.clock.now().timestamp();
            if !self.revoked.revoke(jti, claims.exp, now) {
                return Err(invalid());
            }
        }

        Ok(self.issue_pair(&user.id.to_string())?)
    }
}
