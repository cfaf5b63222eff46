use uuid::Uuid;

use tsuki_types::api::SessionClaims;

use crate::error::{AuthError, Result};
use crate::token::TokenService;

/// Per-request authentication: a token in, an identity or a single error
/// kind out. Never yields a partial identity.
pub struct SessionGate<'a> {
    tokens: &'a TokenService,
}

impl<'a> SessionGate<'a> {
    pub fn new(tokens: &'a TokenService) -> Self {
        Self { tokens }
    }

    pub fn authenticate(&self, session_token: Option<&str>) -> Result<Uuid> {
        self.claims(session_token).map(|claims| claims.user_id)
    }

    /// Same contract as [`authenticate`](Self::authenticate), keeping the
    /// whole claim set for callers that attach it to the request.
    pub fn claims(&self, session_token: Option<&str>) -> Result<SessionClaims> {
        match session_token.map(str::trim) {
            None | Some("") => Err(AuthError::not_logged_in()),
            Some(token) => self.tokens.parse(token),
        }
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header?.strip_prefix("Bearer ").map(str::trim)
}
