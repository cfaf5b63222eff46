use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The canonical local account, whatever provider it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub verified: bool,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A post as listings show it: with its author and vote count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub author: String,
    pub author_avatar: Option<String>,
    pub votes: u64,
}

/// Where an identity originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Local,
    Discord,
    GitHub,
    Google,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Discord => "discord",
            Self::GitHub => "github",
            Self::Google => "google",
        }
    }

    pub fn is_oauth(self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown identity provider '{}'", self.0)
    }
}

impl std::error::Error for UnknownProvider {}

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "discord" => Ok(Self::Discord),
            "github" => Ok(Self::GitHub),
            "google" => Ok(Self::Google),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// What the caller meant by starting an auth flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginIntent {
    Login,
    Signup,
}

impl LoginIntent {
    /// Callbacks carry `login=true` for login; anything else is a signup.
    pub fn from_login_flag(login: Option<bool>) -> Self {
        if login.unwrap_or(false) {
            Self::Login
        } else {
            Self::Signup
        }
    }
}

// -- Provider profiles --

#[derive(Debug, Clone, Deserialize)]
pub struct LocalProfile {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// `GET /users/@me`
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordProfile {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    #[serde(default)]
    pub verified: bool,
    /// Avatar hash, not a URL.
    pub avatar: Option<String>,
}

/// `GET /user`. The email fields are filled from `/user/emails` when the
/// public profile hides the address.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubProfile {
    pub login: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

/// One entry of `GET /user/emails`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubEmail {
    pub email: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub verified: bool,
}

/// OpenID `userinfo` (v3).
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleProfile {
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub picture: Option<String>,
}

/// A closed set of inbound identities.
#[derive(Debug, Clone)]
pub enum ProviderProfile {
    Local(LocalProfile),
    Discord(DiscordProfile),
    GitHub(GitHubProfile),
    Google(GoogleProfile),
}

impl ProviderProfile {
    pub fn provider(&self) -> Provider {
        match self {
            Self::Local(_) => Provider::Local,
            Self::Discord(_) => Provider::Discord,
            Self::GitHub(_) => Provider::GitHub,
            Self::Google(_) => Provider::Google,
        }
    }
}

/// Provider-independent shape a new account is created from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalProfile {
    pub provider: Provider,
    pub email: Option<String>,
    pub username: String,
    pub verified_by_provider: bool,
    pub avatar_url: Option<String>,
}

// -- Relationships --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// actor follows target user
    Follow,
    /// actor voted on target post
    Vote,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Vote => "vote",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only mutations a user row accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserUpdate {
    Username(String),
    /// An already-hashed password.
    Password(String),
    Avatar(Option<String>),
    SetVerified(bool),
}

impl UserUpdate {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Username(_) => "username",
            Self::Password(_) => "password",
            Self::Avatar(_) => "avatar",
            Self::SetVerified(_) => "verified",
        }
    }
}

// -- Pagination --

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Per-request window over a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Page {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }

    pub fn clamped(self) -> Self {
        Self {
            limit: self.limit.clamp(1, MAX_PAGE_LIMIT),
            offset: self.offset,
        }
    }
}
