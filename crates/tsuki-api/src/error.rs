use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use tsuki_auth::AuthError;

/// Handler error. Wraps the core error kinds and renders them as
/// `{"error": "..."}` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub AuthError);

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self(AuthError::Internal(msg.into()))
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(AuthError::Validation(msg.into()))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AuthError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::Conflict(_) => StatusCode::CONFLICT,
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AuthError::Persistence(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            AuthError::Persistence(e) => {
                error!("Persistence failure: {:#}", e);
                "internal server error".to_string()
            }
            AuthError::Internal(msg) => {
                error!("Internal error: {}", msg);
                "internal server error".to_string()
            }
            AuthError::Upstream(msg) => {
                error!("Upstream failure: {}", msg);
                self.0.to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_statuses() {
        let cases = [
            (AuthError::not_logged_in(), StatusCode::UNAUTHORIZED),
            (AuthError::not_found("user"), StatusCode::NOT_FOUND),
            (AuthError::Conflict("username already taken".into()), StatusCode::CONFLICT),
            (AuthError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (AuthError::Upstream("github down".into()), StatusCode::BAD_GATEWAY),
            (
                AuthError::Persistence(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }
}
