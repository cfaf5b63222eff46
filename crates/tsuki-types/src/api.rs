use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Token claims --

/// Signed payload of both session and verification tokens. Shared by the
/// token service and the HTTP middleware, so it lives here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "UserId")]
    pub user_id: Uuid,
    #[serde(rename = "iss")]
    pub issuer: String,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "exp", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub user_id: Uuid,
    pub username: String,
    pub verified: bool,
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OAuthStartQuery {
    pub login: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: String,
    pub login: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// -- Users --

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub username: String,
    /// Only present on the owner's own profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub verified: bool,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub followers: u64,
    pub following: u64,
    pub posts: u64,
    /// Own profile: whether the account came from an OAuth provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth: Option<bool>,
    /// Someone else's profile, viewed while logged in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follows: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateUsernameRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateAvatarRequest {
    pub avatar_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteAccountRequest {
    pub password: Option<String>,
}

/// `?q=`; the page travels in its own query extractor.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleFollowResponse {
    pub following: bool,
}

// -- Posts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleVoteResponse {
    pub voted: bool,
    pub votes: u64,
}
