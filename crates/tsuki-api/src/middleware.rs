use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use tsuki_auth::SessionGate;
use tsuki_auth::session::bearer_token;
use tsuki_types::api::SessionClaims;

use crate::auth::AppState;
use crate::error::ApiError;

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Extract and validate the session token from the Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = SessionGate::new(&state.tokens).claims(bearer_token(authorization(req.headers())))?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Viewer identity for routes that also serve anonymous callers. A bad
/// token counts as anonymous.
pub fn optional_viewer(state: &AppState, headers: &HeaderMap) -> Option<Uuid> {
    SessionGate::new(&state.tokens)
        .claims(bearer_token(authorization(headers)))
        .ok()
        .map(|claims: SessionClaims| claims.user_id)
}
