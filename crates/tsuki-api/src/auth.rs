use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
};
use tracing::{debug, error, info};

use tsuki_auth::{Accounts, AuthError, Notifier, Session, TokenService};
use tsuki_db::Database;
use tsuki_types::api::{
    LoginRequest, OAuthCallbackQuery, OAuthStartQuery, SessionClaims, SessionResponse,
    SignupRequest,
};
use tsuki_types::models::{LocalProfile, LoginIntent, Provider};

use crate::error::{ApiError, ApiResult};
use crate::oauth::OAuthClient;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub tokens: TokenService,
    /// Public base URL, used to build verification links.
    pub base_url: String,
    pub oauth: OAuthClient,
    pub notifier: Arc<dyn Notifier>,
}

/// Run synchronous core work (SQLite, Argon2) off the async workers.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&AppStateInner) -> tsuki_auth::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::internal("background task failed")
        })?
        .map_err(ApiError::from)
}

fn session_response(session: Session) -> SessionResponse {
    SessionResponse {
        user_id: session.user.id,
        username: session.user.username,
        verified: session.user.verified,
        token: session.token,
    }
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> ApiResult<impl IntoResponse> {
    let profile = LocalProfile {
        username: req.username,
        email: req.email,
        password: req.password,
    };
    let session = blocking(&state, move |s| {
        Accounts::new(&s.db, &s.tokens).signup_local(profile)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(session_response(session))))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = blocking(&state, move |s| {
        Accounts::new(&s.db, &s.tokens).login_local(&req.username, &req.password)
    })
    .await?;

    Ok(Json(session_response(session)))
}

/// Tokens are stateless; the client drops its copy.
pub async fn logout(Extension(claims): Extension<SessionClaims>) -> StatusCode {
    debug!("User {} logged out", claims.user_id);
    StatusCode::NO_CONTENT
}

fn parse_provider(raw: &str) -> ApiResult<Provider> {
    match raw.parse::<Provider>() {
        Ok(provider) if provider.is_oauth() => Ok(provider),
        _ => Err(AuthError::not_found(format!("provider '{}'", raw)).into()),
    }
}

pub async fn oauth_start(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthStartQuery>,
) -> ApiResult<Redirect> {
    let provider = parse_provider(&provider)?;
    let intent = LoginIntent::from_login_flag(query.login);
    let url = state.oauth.authorize_url(provider, intent)?;
    Ok(Redirect::to(url.as_str()))
}

pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
) -> ApiResult<impl IntoResponse> {
    let provider = parse_provider(&provider)?;
    let intent = LoginIntent::from_login_flag(query.login);

    let profile = state.oauth.fetch_profile(provider, &query.code, intent).await?;
    let session = blocking(&state, move |s| {
        Accounts::new(&s.db, &s.tokens).oauth(&profile, intent)
    })
    .await?;

    info!("OAuth {:?} via {} finished for {}", intent, provider, session.user.id);
    Ok(Json(session_response(session)))
}
