use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use tsuki_types::models::{LocalProfile, LoginIntent, ProviderProfile, User, UserUpdate};
use tsuki_types::store::Store;

use crate::error::{AuthError, Result};
use crate::identity::{IdentityNormalizer, Resolution, validate_username};
use crate::password::{hash_password, unusable_password_hash, verify_password};
use crate::token::{TokenProfile, TokenService};

/// A user together with a freshly issued session token.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub token: String,
}

/// Account lifecycle on top of the store: signup, login, OAuth linkage by
/// email, settings, deletion.
pub struct Accounts<'a, S: ?Sized> {
    store: &'a S,
    tokens: &'a TokenService,
}

impl<'a, S: Store + ?Sized> Accounts<'a, S> {
    pub fn new(store: &'a S, tokens: &'a TokenService) -> Self {
        Self { store, tokens }
    }

    pub fn signup_local(&self, profile: LocalProfile) -> Result<Session> {
        if profile.password.is_empty() {
            return Err(AuthError::Validation("password must not be empty".into()));
        }
        let password = profile.password.clone();
        let canonical =
            IdentityNormalizer::new(self.store).normalize(&ProviderProfile::Local(profile))?;

        if let Some(email) = canonical.email.as_deref() {
            if self.store.find_user_by_email(email)?.is_some() {
                return Err(AuthError::Conflict(
                    "an account already exists with the given email".into(),
                ));
            }
        }

        let user = User {
            id: Uuid::new_v4(),
            email: canonical.email,
            username: canonical.username,
            password_hash: hash_password(&password)?,
            verified: false,
            avatar_url: None,
            created_at: Utc::now(),
        };
        self.store.create_user(&user, false)?;
        info!("User {} ({}) signed up", user.username, user.id);

        self.session_for(user)
    }

    pub fn login_local(&self, username: &str, password: &str) -> Result<Session> {
        let user = self
            .store
            .find_user_by_username(username.trim())?
            .ok_or_else(|| AuthError::not_found("user"))?;

        if !verify_password(password, &user.password_hash)? {
            return Err(AuthError::Authentication("incorrect password".into()));
        }

        self.session_for(user)
    }

    /// Sign up or log in through an external provider, keyed by email.
    pub fn oauth(&self, profile: &ProviderProfile, intent: LoginIntent) -> Result<Session> {
        if !profile.provider().is_oauth() {
            return Err(AuthError::Validation(
                "local identities sign up and log in with a password".into(),
            ));
        }

        match IdentityNormalizer::new(self.store).resolve(profile, intent)? {
            Resolution::Existing(user) => {
                info!("User {} logged in via {}", user.id, profile.provider());
                self.session_for(user)
            }
            Resolution::New(canonical) => {
                let user = User {
                    id: Uuid::new_v4(),
                    email: canonical.email,
                    username: canonical.username,
                    password_hash: unusable_password_hash()?,
                    verified: canonical.verified_by_provider,
                    avatar_url: canonical.avatar_url,
                    created_at: Utc::now(),
                };
                // A username grabbed between the collision check and here
                // surfaces as a conflict; the caller may simply retry.
                self.store.create_user(&user, true)?;
                info!(
                    "User {} ({}) signed up via {}",
                    user.username,
                    user.id,
                    canonical.provider
                );
                self.session_for(user)
            }
        }
    }

    pub fn session_for(&self, user: User) -> Result<Session> {
        let token = self.tokens.issue_for(TokenProfile::Session, user.id)?;
        Ok(Session { user, token })
    }

    pub fn user(&self, user_id: Uuid) -> Result<User> {
        self.store
            .find_user_by_id(user_id)?
            .ok_or_else(|| AuthError::not_found("user"))
    }

    /// Destructive actions need the current password unless the account
    /// came from an OAuth provider.
    pub fn requires_password_confirmation(&self, user_id: Uuid) -> Result<bool> {
        Ok(!self.store.is_oauth_origin(user_id)?)
    }

    pub fn update_username(&self, user_id: Uuid, new_username: &str) -> Result<User> {
        let new_username = new_username.trim();
        validate_username(new_username)?;

        let mut user = self.user(user_id)?;
        if user.username == new_username {
            return Err(AuthError::Conflict(
                "new username cannot be the same as the current one".into(),
            ));
        }
        if self.store.find_user_by_username(new_username)?.is_some() {
            return Err(AuthError::Conflict("username already taken".into()));
        }

        self.apply(user_id, UserUpdate::Username(new_username.to_string()))?;
        info!("User {} renamed {} -> {}", user_id, user.username, new_username);
        user.username = new_username.to_string();
        Ok(user)
    }

    pub fn update_password(&self, user_id: Uuid, new_password: &str) -> Result<()> {
        if new_password.is_empty() {
            return Err(AuthError::Validation("password must not be empty".into()));
        }
        let user = self.user(user_id)?;
        if verify_password(new_password, &user.password_hash)? {
            return Err(AuthError::Conflict(
                "new password cannot be the same as the current one".into(),
            ));
        }

        self.apply(user_id, UserUpdate::Password(hash_password(new_password)?))?;
        info!("User {} changed password", user_id);
        Ok(())
    }

    /// `None` clears the avatar.
    pub fn update_avatar(&self, user_id: Uuid, avatar_url: Option<String>) -> Result<()> {
        let avatar_url = avatar_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        if let Some(url) = &avatar_url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(AuthError::Validation("avatar must be an http(s) URL".into()));
            }
        }
        self.apply(user_id, UserUpdate::Avatar(avatar_url))
    }

    pub fn delete_account(&self, user_id: Uuid, password: Option<&str>) -> Result<()> {
        let user = self.user(user_id)?;

        if self.requires_password_confirmation(user_id)? {
            let confirmed = match password {
                Some(password) => verify_password(password, &user.password_hash)?,
                None => false,
            };
            if !confirmed {
                return Err(AuthError::Authentication("incorrect password".into()));
            }
        }

        if !self.store.delete_user(user_id)? {
            return Err(AuthError::not_found("user"));
        }
        info!("User {} ({}) deleted", user.username, user.id);
        Ok(())
    }

    fn apply(&self, user_id: Uuid, update: UserUpdate) -> Result<()> {
        if self.store.update_user(user_id, &update)? {
            Ok(())
        } else {
            Err(AuthError::not_found("user"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionGate;
    use crate::verification::{Redemption, VerificationFlow};
    use tsuki_db::Database;
    use tsuki_types::models::{DiscordProfile, GitHubProfile, GoogleProfile};

    fn tokens() -> TokenService {
        TokenService::new(b"accounts-secret", "tsuki-test")
    }

    fn local(username: &str, password: &str, email: &str) -> LocalProfile {
        LocalProfile {
            username: username.into(),
            password: password.into(),
            email: email.into(),
        }
    }

    fn github(login: &str, email: &str) -> ProviderProfile {
        ProviderProfile::GitHub(GitHubProfile {
            login: login.into(),
            email: Some(email.into()),
            avatar_url: None,
            email_verified: true,
        })
    }

    fn google(email: &str) -> ProviderProfile {
        ProviderProfile::Google(GoogleProfile {
            email: email.into(),
            email_verified: true,
            name: Some("Someone Else".into()),
            given_name: None,
            picture: Some("https://lh3.example/p.png".into()),
        })
    }

    #[test]
    fn signup_verify_and_redeem_twice() {
        let db = Database::open_in_memory().unwrap();
        let tokens = tokens();
        let accounts = Accounts::new(&db, &tokens);

        let session = accounts
            .signup_local(local("bob", "x", "bob@example.com"))
            .unwrap();
        assert!(!session.user.verified);
        assert_eq!(
            SessionGate::new(&tokens).authenticate(Some(&session.token)).unwrap(),
            session.user.id
        );

        let flow = VerificationFlow::new(&db, &tokens, "http://localhost:3000");
        let (id, _mail) = flow.request(session.user.id).unwrap();

        assert_eq!(flow.redeem(&id).unwrap(), Redemption::Verified);
        let verified = accounts.user(session.user.id).unwrap();
        assert!(verified.verified);

        assert_eq!(flow.redeem(&id).unwrap(), Redemption::AlreadyVerified);
        assert_eq!(accounts.user(session.user.id).unwrap(), verified);
    }

    #[test]
    fn local_login_checks_password() {
        let db = Database::open_in_memory().unwrap();
        let tokens = tokens();
        let accounts = Accounts::new(&db, &tokens);
        let signup = accounts
            .signup_local(local("carol", "secret", "carol@example.com"))
            .unwrap();

        let login = accounts.login_local("carol", "secret").unwrap();
        assert_eq!(login.user.id, signup.user.id);

        assert!(matches!(
            accounts.login_local("carol", "wrong"),
            Err(AuthError::Authentication(_))
        ));
        assert!(matches!(
            accounts.login_local("nobody", "secret"),
            Err(AuthError::NotFound(_))
        ));
    }

    #[test]
    fn local_signup_rejects_duplicates() {
        let db = Database::open_in_memory().unwrap();
        let tokens = tokens();
        let accounts = Accounts::new(&db, &tokens);
        accounts
            .signup_local(local("dave", "pw", "dave@example.com"))
            .unwrap();

        assert!(matches!(
            accounts.signup_local(local("dave", "pw", "other@example.com")),
            Err(AuthError::Conflict(_))
        ));
        assert!(matches!(
            accounts.signup_local(local("david", "pw", "DAVE@example.com")),
            Err(AuthError::Conflict(_))
        ));
    }

    #[test]
    fn oauth_accounts_link_by_email() {
        let db = Database::open_in_memory().unwrap();
        let tokens = tokens();
        let accounts = Accounts::new(&db, &tokens);

        let created = accounts
            .oauth(&github("eve", "eve@example.com"), LoginIntent::Signup)
            .unwrap();
        assert!(created.user.verified);
        assert!(db.is_oauth_user(created.user.id).unwrap());

        let again = accounts
            .oauth(&google("eve@example.com"), LoginIntent::Login)
            .unwrap();
        assert_eq!(again.user.id, created.user.id);

        assert!(matches!(
            accounts.oauth(&google("eve@example.com"), LoginIntent::Signup),
            Err(AuthError::Conflict(_))
        ));
    }

    #[test]
    fn oauth_signup_renames_on_collision_and_cannot_password_login() {
        let db = Database::open_in_memory().unwrap();
        let tokens = tokens();
        let accounts = Accounts::new(&db, &tokens);
        accounts
            .signup_local(local("frank", "pw", "frank@example.com"))
            .unwrap();

        let oauth = accounts
            .oauth(&github("frank", "frank@work.example"), LoginIntent::Signup)
            .unwrap();
        assert_ne!(oauth.user.username, "frank");
        assert!(oauth.user.username.starts_with("frank"));
        assert!(oauth.user.username.chars().count() <= 32);

        for guess in ["", "frank", "password"] {
            assert!(accounts.login_local(&oauth.user.username, guess).is_err());
        }
    }

    #[test]
    fn unverified_discord_email_does_not_open_someone_elses_account() {
        let db = Database::open_in_memory().unwrap();
        let tokens = tokens();
        let accounts = Accounts::new(&db, &tokens);
        accounts
            .signup_local(local("owner", "pw", "owner@example.com"))
            .unwrap();

        let impostor = ProviderProfile::Discord(DiscordProfile {
            id: "99".into(),
            username: "impostor".into(),
            email: Some("owner@example.com".into()),
            verified: false,
            avatar: None,
        });
        assert!(matches!(
            accounts.oauth(&impostor, LoginIntent::Login),
            Err(AuthError::Authentication(_))
        ));
    }

    #[test]
    fn local_profiles_are_refused_on_the_oauth_path() {
        let db = Database::open_in_memory().unwrap();
        let tokens = tokens();
        let profile = ProviderProfile::Local(local("gina", "pw", "gina@example.com"));
        assert!(matches!(
            Accounts::new(&db, &tokens).oauth(&profile, LoginIntent::Signup),
            Err(AuthError::Validation(_))
        ));
    }

    #[test]
    fn settings_updates() {
        let db = Database::open_in_memory().unwrap();
        let tokens = tokens();
        let accounts = Accounts::new(&db, &tokens);
        let a = accounts.signup_local(local("hank", "pw1", "hank@example.com")).unwrap();
        accounts.signup_local(local("iris", "pw2", "iris@example.com")).unwrap();

        assert!(matches!(
            accounts.update_username(a.user.id, "hank"),
            Err(AuthError::Conflict(_))
        ));
        assert!(matches!(
            accounts.update_username(a.user.id, "iris"),
            Err(AuthError::Conflict(_))
        ));
        assert_eq!(accounts.update_username(a.user.id, "henry").unwrap().username, "henry");

        assert!(matches!(
            accounts.update_password(a.user.id, "pw1"),
            Err(AuthError::Conflict(_))
        ));
        accounts.update_password(a.user.id, "pw3").unwrap();
        assert!(accounts.login_local("henry", "pw3").is_ok());
        assert!(accounts.login_local("henry", "pw1").is_err());

        accounts
            .update_avatar(a.user.id, Some("https://img.example/h.png".into()))
            .unwrap();
        assert_eq!(
            accounts.user(a.user.id).unwrap().avatar_url.as_deref(),
            Some("https://img.example/h.png")
        );
        assert!(matches!(
            accounts.update_avatar(a.user.id, Some("javascript:alert(1)".into())),
            Err(AuthError::Validation(_))
        ));
        accounts.update_avatar(a.user.id, None).unwrap();
        assert!(accounts.user(a.user.id).unwrap().avatar_url.is_none());

        assert!(matches!(
            accounts.update_username(Uuid::new_v4(), "ghost"),
            Err(AuthError::NotFound(_))
        ));
    }

    #[test]
    fn deletion_confirms_password_only_for_local_accounts() {
        let db = Database::open_in_memory().unwrap();
        let tokens = tokens();
        let accounts = Accounts::new(&db, &tokens);

        let local_user = accounts.signup_local(local("jack", "pw", "jack@example.com")).unwrap();
        assert!(accounts.requires_password_confirmation(local_user.user.id).unwrap());
        assert!(matches!(
            accounts.delete_account(local_user.user.id, None),
            Err(AuthError::Authentication(_))
        ));
        assert!(matches!(
            accounts.delete_account(local_user.user.id, Some("nope")),
            Err(AuthError::Authentication(_))
        ));
        accounts.delete_account(local_user.user.id, Some("pw")).unwrap();
        assert!(matches!(accounts.user(local_user.user.id), Err(AuthError::NotFound(_))));

        let oauth_user = accounts
            .oauth(&github("kate", "kate@example.com"), LoginIntent::Signup)
            .unwrap();
        assert!(!accounts.requires_password_confirmation(oauth_user.user.id).unwrap());
        accounts.delete_account(oauth_user.user.id, None).unwrap();
        assert!(db.get_user_by_id(oauth_user.user.id).unwrap().is_none());
    }
}
