//! Collapses the supported identity sources into one [`CanonicalProfile`]
//! and decides, by email, whether an inbound identity is a known account.

use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::{debug, warn};

use tsuki_types::MAX_USERNAME_LEN;
use tsuki_types::models::{CanonicalProfile, LoginIntent, Provider, ProviderProfile, User};
use tsuki_types::store::Store;

use crate::error::{AuthError, Result};

/// Shortest random suffix appended to a colliding provider username.
const MIN_SUFFIX_LEN: usize = 4;

const DISCORD_AVATAR_BASE: &str = "https://cdn.discordapp.com/avatars";

/// Outcome of matching an inbound identity against existing accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Login intent, and an account with this email exists.
    Existing(User),
    /// Signup intent, and nobody owns this email yet.
    New(CanonicalProfile),
}

pub struct IdentityNormalizer<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> IdentityNormalizer<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Canonicalize `profile` and settle its username against the store.
    ///
    /// Provider usernames that are already taken get a random alphanumeric
    /// suffix. A local signup picked its own name, so a taken one is a
    /// conflict instead.
    pub fn normalize(&self, profile: &ProviderProfile) -> Result<CanonicalProfile> {
        let mut canonical = canonicalize(profile)?;

        if self.store.find_user_by_username(&canonical.username)?.is_some() {
            if canonical.provider == Provider::Local {
                return Err(AuthError::Conflict("username already taken".to_string()));
            }
            let renamed = suffixed(&canonical.username);
            debug!(
                "Username '{}' from {} taken, using '{}'",
                canonical.username, canonical.provider, renamed
            );
            canonical.username = renamed;
        }

        Ok(canonical)
    }

    /// Email is the identity key across providers: a login attaches to the
    /// account that owns the email, a signup must not find one. Only an
    /// address the provider has verified may log in to an existing account.
    pub fn resolve(&self, profile: &ProviderProfile, intent: LoginIntent) -> Result<Resolution> {
        let canonical = canonicalize(profile)?;
        let email = canonical.email.as_deref().ok_or_else(|| {
            AuthError::Upstream(format!("{} did not share an email address", canonical.provider))
        })?;

        if intent == LoginIntent::Login && !canonical.verified_by_provider {
            warn!("Refused {} login with an unverified email", canonical.provider);
            return Err(AuthError::Authentication(format!(
                "{} has not verified this email address",
                canonical.provider
            )));
        }

        let existing = self.store.find_user_by_email(email)?;
        match (intent, existing) {
            (LoginIntent::Login, Some(user)) => Ok(Resolution::Existing(user)),
            (LoginIntent::Login, None) => Err(AuthError::not_found("account")),
            (LoginIntent::Signup, Some(_)) => Err(AuthError::Conflict(
                "an account already exists with the given email".to_string(),
            )),
            (LoginIntent::Signup, None) => self.normalize(profile).map(Resolution::New),
        }
    }
}

/// Provider-specific field mapping, without touching the store.
pub fn canonicalize(profile: &ProviderProfile) -> Result<CanonicalProfile> {
    let provider = profile.provider();
    let canonical = match profile {
        ProviderProfile::Local(local) => {
            let username = local.username.trim();
            validate_username(username)?;
            let email = normalize_email(Some(local.email.as_str()))
                .ok_or_else(|| AuthError::Validation("a valid email address is required".into()))?;
            if local.password.is_empty() {
                return Err(AuthError::Validation("password must not be empty".into()));
            }
            CanonicalProfile {
                provider,
                email: Some(email),
                username: username.to_string(),
                verified_by_provider: false,
                avatar_url: None,
            }
        }
        ProviderProfile::Discord(discord) => {
            let email = normalize_email(discord.email.as_deref());
            CanonicalProfile {
                provider,
                username: provider_username(Some(discord.username.as_str()), email.as_deref()),
                email,
                verified_by_provider: discord.verified,
                avatar_url: discord
                    .avatar
                    .as_ref()
                    .map(|hash| format!("{}/{}/{}", DISCORD_AVATAR_BASE, discord.id, hash)),
            }
        }
        ProviderProfile::GitHub(github) => {
            let email = normalize_email(github.email.as_deref());
            CanonicalProfile {
                provider,
                username: provider_username(Some(github.login.as_str()), email.as_deref()),
                email,
                verified_by_provider: github.email_verified,
                avatar_url: github.avatar_url.clone(),
            }
        }
        ProviderProfile::Google(google) => {
            let email = normalize_email(Some(google.email.as_str()));
            let name = google.given_name.as_deref().or(google.name.as_deref());
            CanonicalProfile {
                provider,
                username: provider_username(name, email.as_deref()),
                email,
                verified_by_provider: google.email_verified,
                avatar_url: google.picture.clone(),
            }
        }
    };
    Ok(canonical)
}

/// 1 to 32 characters, no whitespace.
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(AuthError::Validation("username must not be empty".into()));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(AuthError::Validation(format!(
            "username must be at most {} characters",
            MAX_USERNAME_LEN
        )));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(AuthError::Validation("username must not contain whitespace".into()));
    }
    Ok(())
}

fn normalize_email(raw: Option<&str>) -> Option<String> {
    let email = raw?.trim().to_lowercase();
    (email.len() > 2 && email.contains('@')).then_some(email)
}

/// Provider display names can hold spaces or be missing entirely; fall back
/// to the email local part, then to a fixed name. Always 1 to 32 chars.
fn provider_username(name: Option<&str>, email: Option<&str>) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_whitespace() && !c.is_control())
            .take(MAX_USERNAME_LEN)
            .collect()
    };

    let from_name = name.map(clean).unwrap_or_default();
    if !from_name.is_empty() {
        return from_name;
    }
    let from_email = email
        .and_then(|e| e.split('@').next())
        .map(clean)
        .unwrap_or_default();
    if !from_email.is_empty() {
        return from_email;
    }
    "user".to_string()
}

/// Fill the remaining room up to the length limit with random alphanumerics,
/// truncating `base` first when it leaves less than [`MIN_SUFFIX_LEN`].
fn suffixed(base: &str) -> String {
    let suffix_len = MAX_USERNAME_LEN
        .saturating_sub(base.chars().count())
        .max(MIN_SUFFIX_LEN);

    let mut name: String = base.chars().take(MAX_USERNAME_LEN - suffix_len).collect();
    name.extend(
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(suffix_len)
            .map(char::from),
    );
    name
}
