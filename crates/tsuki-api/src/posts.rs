use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use tsuki_auth::{AuthError, ToggleStateManager};
use tsuki_types::api::{CreatePostRequest, PostResponse, SessionClaims, ToggleVoteResponse};
use tsuki_types::models::{EdgeKind, Page, Post};

use crate::auth::{AppState, blocking};
use crate::error::{ApiError, ApiResult};

const MAX_POST_LEN: usize = 2000;

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<CreatePostRequest>,
) -> ApiResult<impl IntoResponse> {
    let body = req.body.trim().to_string();
    if body.is_empty() || body.chars().count() > MAX_POST_LEN {
        return Err(ApiError::bad_request(format!(
            "post body must be 1 to {} characters",
            MAX_POST_LEN
        )));
    }

    let post = Post {
        id: Uuid::new_v4(),
        author_id: claims.user_id,
        body,
        created_at: Utc::now(),
    };

    let post = blocking(&state, move |s| {
        // Sessions outlive deleted accounts.
        if s.db.get_user_by_id(post.author_id).map_err(AuthError::Persistence)?.is_none() {
            return Err(AuthError::not_found("user"));
        }
        s.db.create_post(&post).map_err(AuthError::Persistence)?;
        info!("Post {} created by {}", post.id, post.author_id);
        Ok(post)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(PostResponse {
            id: post.id,
            author_id: post.author_id,
            body: post.body,
            created_at: post.created_at,
        }),
    ))
}

pub async fn toggle_vote(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    Extension(claims): Extension<SessionClaims>,
) -> ApiResult<Json<ToggleVoteResponse>> {
    let post_id: Uuid = post_id
        .parse()
        .map_err(|_| ApiError::bad_request("invalid post id"))?;
    let (voted, votes) = blocking(&state, move |s| {
        let toggles = ToggleStateManager::new(&s.db);
        toggles.toggle(EdgeKind::Vote, claims.user_id, post_id)?;
        let voted = toggles.exists(EdgeKind::Vote, claims.user_id, post_id)?;
        let votes = s
            .db
            .count_incoming(EdgeKind::Vote, post_id)
            .map_err(AuthError::Persistence)?;
        Ok((voted, votes))
    })
    .await?;

    Ok(Json(ToggleVoteResponse { voted, votes }))
}

/// Posts by the accounts the caller follows, newest first.
pub async fn feed(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Query(page): Query<Page>,
) -> ApiResult<impl IntoResponse> {
    let page = page.clamped();
    let posts = blocking(&state, move |s| {
        if s.db.get_user_by_id(claims.user_id).map_err(AuthError::Persistence)?.is_none() {
            return Err(AuthError::not_found("user"));
        }
        s.db.get_feed(claims.user_id, page).map_err(AuthError::Persistence)
    })
    .await?;

    Ok(Json(json!({
        "posts": posts,
        "limit": page.limit,
        "offset": page.offset,
    })))
}
