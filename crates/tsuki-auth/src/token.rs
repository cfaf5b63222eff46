//! HS256-signed claim tokens.
//!
//! One service issues both session tokens (no expiry) and verification
//! tokens (two hours). Parsing never says *why* a token was rejected.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;
use uuid::Uuid;

use tsuki_types::api::SessionClaims;

use crate::error::{AuthError, Result};

pub const VERIFICATION_TTL_HOURS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenProfile {
    /// Held by the client for as long as it likes.
    Session,
    /// Embedded (indirectly) in a verification link.
    Verification,
}

impl TokenProfile {
    pub fn ttl(self) -> Option<Duration> {
        match self {
            Self::Session => None,
            Self::Verification => Some(Duration::hours(VERIFICATION_TTL_HOURS)),
        }
    }
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
}

impl TokenService {
    /// `secret` is the process-wide signing key; it is read once at startup.
    pub fn new(secret: &[u8], issuer: impl Into<String>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is optional and checked by hand against an explicit clock.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issue a token for the given profile under the configured issuer.
    pub fn issue_for(&self, profile: TokenProfile, user_id: Uuid) -> Result<String> {
        self.issue(user_id, &self.issuer, profile.ttl())
    }

    pub fn issue(&self, user_id: Uuid, issuer: &str, ttl: Option<Duration>) -> Result<String> {
        self.issue_at(user_id, issuer, Utc::now().timestamp(), ttl)
    }

    /// Issue with an explicit issuance time (seconds since the epoch).
    pub fn issue_at(
        &self,
        user_id: Uuid,
        issuer: &str,
        issued_at: i64,
        ttl: Option<Duration>,
    ) -> Result<String> {
        let claims = SessionClaims {
            user_id,
            issuer: issuer.to_string(),
            issued_at,
            expires_at: ttl.map(|ttl| issued_at + ttl.num_seconds()),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("token encoding failed: {}", e)))
    }

    pub fn parse(&self, token: &str) -> Result<SessionClaims> {
        self.parse_at(token, Utc::now().timestamp())
    }

    /// Verify the signature and, when the token carries one, that `now` is
    /// strictly before its expiry.
    pub fn parse_at(&self, token: &str, now: i64) -> Result<SessionClaims> {
        let claims = decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| {
                debug!("Rejected token: {}", e);
                AuthError::invalid_token()
            })?
            .claims;

        if matches!(claims.expires_at, Some(exp) if now >= exp) {
            debug!("Rejected expired token for {}", claims.user_id);
            return Err(AuthError::invalid_token());
        }

        Ok(claims)
    }
}
