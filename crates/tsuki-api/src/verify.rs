use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use tsuki_auth::notify::deliver;
use tsuki_auth::{Redemption, VerificationFlow};
use tsuki_types::api::{MessageResponse, SessionClaims};

use crate::auth::{AppState, blocking};
use crate::error::ApiResult;

pub async fn request_verification(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
) -> ApiResult<impl IntoResponse> {
    let (_id, mail) = blocking(&state, move |s| {
        VerificationFlow::new(&s.db, &s.tokens, &s.base_url).request(claims.user_id)
    })
    .await?;

    deliver(state.notifier.as_ref(), &mail).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new(format!("verification mail sent to {}", mail.to))),
    ))
}

pub async fn redeem(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let outcome = blocking(&state, move |s| {
        VerificationFlow::new(&s.db, &s.tokens, &s.base_url).redeem(&id)
    })
    .await?;

    Ok(Json(MessageResponse::new(match outcome {
        Redemption::Verified => "account verified",
        Redemption::AlreadyVerified => "account already verified",
    })))
}
