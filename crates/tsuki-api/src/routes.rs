use axum::{
    Router, middleware,
    routing::{get, post, put},
};

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{posts, users, verify};

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/auth/oauth/{provider}", get(auth::oauth_start))
        .route("/auth/oauth/{provider}/callback", get(auth::oauth_callback))
        .route("/auth/verify/{id}", get(verify::redeem))
        .route("/user/{username}", get(users::profile))
        .route("/user/{username}/followers", get(users::followers))
        .route("/user/{username}/following", get(users::following))
        .route("/user/{username}/posts", get(users::posts))
        .route("/search", get(users::search))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/verify", post(verify::request_verification))
        .route("/user", get(users::me))
        .route("/user/{username}/toggle-follow", post(users::toggle_follow))
        .route("/user/settings/username", put(users::update_username))
        .route("/user/settings/password", put(users::update_password))
        .route("/user/settings/avatar", put(users::update_avatar))
        .route("/user/settings/delete", post(users::delete_account))
        .route("/feed", get(posts::feed))
        .route("/posts", post(posts::create_post))
        .route("/posts/{id}/toggle-vote", post(posts::toggle_vote))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
