use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use tsuki_auth::{Accounts, AuthError, ToggleStateManager};
use tsuki_db::Database;
use tsuki_types::api::{
    DeleteAccountRequest, MessageResponse, ProfileResponse, SearchQuery, SessionClaims,
    ToggleFollowResponse, UpdateAvatarRequest, UpdatePasswordRequest, UpdateUsernameRequest,
};
use tsuki_types::models::{EdgeKind, Page, User};

use crate::auth::{AppState, blocking};
use crate::error::{ApiError, ApiResult};
use crate::middleware::optional_viewer;

fn user_by_name(db: &Database, username: &str) -> tsuki_auth::Result<User> {
    db.get_user_by_username(username)
        .map_err(AuthError::Persistence)?
        .ok_or_else(|| AuthError::not_found("user"))
}

fn profile_of(db: &Database, user: User) -> tsuki_auth::Result<ProfileResponse> {
    let followers = db
        .count_incoming(EdgeKind::Follow, user.id)
        .map_err(AuthError::Persistence)?;
    let following = db
        .count_outgoing(EdgeKind::Follow, user.id)
        .map_err(AuthError::Persistence)?;
    let posts = db.count_posts(user.id).map_err(AuthError::Persistence)?;

    Ok(ProfileResponse {
        id: user.id,
        username: user.username,
        email: None,
        verified: user.verified,
        avatar_url: user.avatar_url,
        created_at: user.created_at,
        followers,
        following,
        posts,
        oauth: None,
        follows: None,
    })
}

/// Someone else's profile carries whether the viewer follows them.
fn profile_for(
    db: &Database,
    user: User,
    viewer: Option<Uuid>,
) -> tsuki_auth::Result<ProfileResponse> {
    let target = user.id;
    let mut profile = profile_of(db, user)?;
    if let Some(viewer) = viewer.filter(|v| *v != target) {
        profile.follows =
            Some(ToggleStateManager::new(db).exists(EdgeKind::Follow, viewer, target)?);
    }
    Ok(profile)
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
) -> ApiResult<Json<ProfileResponse>> {
    let profile = blocking(&state, move |s| {
        let accounts = Accounts::new(&s.db, &s.tokens);
        let user = accounts.user(claims.user_id)?;
        let email = user.email.clone();
        let mut profile = profile_of(&s.db, user)?;
        profile.email = email;
        profile.oauth = Some(!accounts.requires_password_confirmation(claims.user_id)?);
        Ok(profile)
    })
    .await?;

    Ok(Json(profile))
}

pub async fn profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<ProfileResponse>> {
    let viewer = optional_viewer(&state, &headers);

    let profile = blocking(&state, move |s| {
        let user = user_by_name(&s.db, &username)?;
        profile_for(&s.db, user, viewer)
    })
    .await?;

    Ok(Json(profile))
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Query(page): Query<Page>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let keyword = query.q.trim().to_string();
    if keyword.is_empty() {
        return Err(ApiError::bad_request("search keyword must not be empty"));
    }
    let viewer = optional_viewer(&state, &headers);
    let page = page.clamped();

    let users = blocking(&state, move |s| {
        let found = s
            .db
            .search_users(&keyword, page)
            .map_err(AuthError::Persistence)?;
        found
            .into_iter()
            .map(|user| profile_for(&s.db, user, viewer))
            .collect::<tsuki_auth::Result<Vec<_>>>()
    })
    .await?;

    Ok(Json(json!({
        "users": users,
        "limit": page.limit,
        "offset": page.offset,
    })))
}

pub async fn posts(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(page): Query<Page>,
) -> ApiResult<impl IntoResponse> {
    let page = page.clamped();
    let posts = blocking(&state, move |s| {
        let user = user_by_name(&s.db, &username)?;
        s.db.get_user_posts(user.id, page).map_err(AuthError::Persistence)
    })
    .await?;

    Ok(Json(json!({
        "posts": posts,
        "limit": page.limit,
        "offset": page.offset,
    })))
}

#[derive(Clone, Copy)]
enum Direction {
    Followers,
    Following,
}

async fn listing(
    state: AppState,
    username: String,
    page: Page,
    direction: Direction,
) -> ApiResult<impl IntoResponse> {
    let page = page.clamped();
    let users = blocking(&state, move |s| {
        let user = user_by_name(&s.db, &username)?;
        let names = match direction {
            Direction::Followers => s.db.get_followers(user.id, page),
            Direction::Following => s.db.get_following(user.id, page),
        };
        names.map_err(AuthError::Persistence)
    })
    .await?;

    Ok(Json(json!({
        "users": users,
        "limit": page.limit,
        "offset": page.offset,
    })))
}

pub async fn followers(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(page): Query<Page>,
) -> ApiResult<impl IntoResponse> {
    listing(state, username, page, Direction::Followers).await
}

pub async fn following(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(page): Query<Page>,
) -> ApiResult<impl IntoResponse> {
    listing(state, username, page, Direction::Following).await
}

pub async fn toggle_follow(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(claims): Extension<SessionClaims>,
) -> ApiResult<Json<ToggleFollowResponse>> {
    let following = blocking(&state, move |s| {
        let target = user_by_name(&s.db, &username)?;
        let toggles = ToggleStateManager::new(&s.db);
        toggles.toggle(EdgeKind::Follow, claims.user_id, target.id)?;
        toggles.exists(EdgeKind::Follow, claims.user_id, target.id)
    })
    .await?;

    Ok(Json(ToggleFollowResponse { following }))
}

// -- Settings --

async fn settings<F>(
    state: AppState,
    user_id: Uuid,
    message: &'static str,
    f: F,
) -> ApiResult<Json<MessageResponse>>
where
    F: FnOnce(&Accounts<'_, Database>, Uuid) -> tsuki_auth::Result<()> + Send + 'static,
{
    blocking(&state, move |s| f(&Accounts::new(&s.db, &s.tokens), user_id)).await?;
    Ok(Json(MessageResponse::new(message)))
}

pub async fn update_username(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<UpdateUsernameRequest>,
) -> ApiResult<Json<MessageResponse>> {
    settings(state, claims.user_id, "username updated", move |accounts, id| {
        accounts.update_username(id, &req.username).map(|_| ())
    })
    .await
}

pub async fn update_password(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<UpdatePasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    settings(state, claims.user_id, "password updated", move |accounts, id| {
        accounts.update_password(id, &req.password)
    })
    .await
}

pub async fn update_avatar(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<UpdateAvatarRequest>,
) -> ApiResult<Json<MessageResponse>> {
    settings(state, claims.user_id, "avatar updated", move |accounts, id| {
        accounts.update_avatar(id, req.avatar_url)
    })
    .await
}

pub async fn delete_account(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<DeleteAccountRequest>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |s| {
        Accounts::new(&s.db, &s.tokens).delete_account(claims.user_id, req.password.as_deref())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}
