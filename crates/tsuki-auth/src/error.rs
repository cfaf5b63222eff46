use thiserror::Error;

use tsuki_types::store::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing, malformed, tampered or expired credentials.
    #[error("{0}")]
    Authentication(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    Validation(String),

    /// An identity provider or the mail transport failed.
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

impl AuthError {
    pub fn not_logged_in() -> Self {
        Self::Authentication("not logged in".to_string())
    }

    pub fn invalid_token() -> Self {
        Self::Authentication("invalid token".to_string())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(field) => Self::Conflict(format!("{} already taken", field)),
            StoreError::Missing(what) => Self::NotFound(what),
            StoreError::Backend(e) => Self::Persistence(e),
        }
    }
}
