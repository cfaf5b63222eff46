//! Authorization-code clients for the external identity providers.

use reqwest::{Client, Url, header};
use serde::Deserialize;
use tracing::{debug, warn};

use tsuki_auth::AuthError;
use tsuki_types::models::{
    DiscordProfile, GitHubEmail, GitHubProfile, GoogleProfile, LoginIntent, Provider,
    ProviderProfile,
};

const DISCORD_AUTHORIZE_URL: &str = "https://discord.com/oauth2/authorize";
const DISCORD_API: &str = "https://discord.com/api/v10";
const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_API: &str = "https://api.github.com";
const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

/// Registered application credentials for one provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Callback URL registered with the provider, without query.
    pub redirect_url: String,
}

impl ProviderConfig {
    /// The login flag rides on the redirect target so the callback knows
    /// which intent it is finishing.
    fn redirect_uri(&self, intent: LoginIntent) -> String {
        match intent {
            LoginIntent::Login => format!("{}?login=true", self.redirect_url),
            LoginIntent::Signup => self.redirect_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OAuthSettings {
    pub discord: Option<ProviderConfig>,
    pub github: Option<ProviderConfig>,
    pub google: Option<ProviderConfig>,
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

pub struct OAuthClient {
    http: Client,
    settings: OAuthSettings,
}

impl OAuthClient {
    pub fn new(settings: OAuthSettings) -> anyhow::Result<Self> {
        // GitHub rejects API calls without a User-Agent.
        let http = Client::builder()
            .user_agent(concat!("tsuki/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, settings })
    }

    pub fn enabled(&self, provider: Provider) -> bool {
        self.config(provider).is_ok()
    }

    fn config(&self, provider: Provider) -> Result<&ProviderConfig, AuthError> {
        let config = match provider {
            Provider::Discord => self.settings.discord.as_ref(),
            Provider::GitHub => self.settings.github.as_ref(),
            Provider::Google => self.settings.google.as_ref(),
            Provider::Local => None,
        };
        config.ok_or_else(|| AuthError::not_found(format!("{} sign-in", provider)))
    }

    pub fn authorize_url(&self, provider: Provider, intent: LoginIntent) -> Result<Url, AuthError> {
        let config = self.config(provider)?;
        let redirect_uri = config.redirect_uri(intent);
        let (base, scope) = match provider {
            Provider::Discord => (DISCORD_AUTHORIZE_URL, "identify email"),
            Provider::GitHub => (GITHUB_AUTHORIZE_URL, "read:user user:email"),
            Provider::Google => (GOOGLE_AUTHORIZE_URL, "openid email profile"),
            Provider::Local => return Err(AuthError::not_found("local sign-in redirect")),
        };

        Url::parse_with_params(
            base,
            &[
                ("client_id", config.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope),
            ],
        )
        .map_err(|e| AuthError::Internal(format!("bad authorize URL for {}: {}", provider, e)))
    }

    /// Exchange an authorization code and fetch the provider's profile.
    /// Anything that goes wrong on the provider side is `Upstream`.
    pub async fn fetch_profile(
        &self,
        provider: Provider,
        code: &str,
        intent: LoginIntent,
    ) -> Result<ProviderProfile, AuthError> {
        let config = self.config(provider)?;
        let redirect_uri = config.redirect_uri(intent);

        match provider {
            Provider::Discord => {
                let token = self
                    .exchange(provider, &format!("{}/oauth2/token", DISCORD_API), config, code, &redirect_uri)
                    .await?;
                let profile: DiscordProfile = self
                    .get_json(provider, &format!("{}/users/@me", DISCORD_API), &token)
                    .await?;
                Ok(ProviderProfile::Discord(profile))
            }
            Provider::GitHub => {
                let token = self
                    .exchange(provider, GITHUB_TOKEN_URL, config, code, &redirect_uri)
                    .await?;
                let mut profile: GitHubProfile = self
                    .get_json(provider, &format!("{}/user", GITHUB_API), &token)
                    .await?;
                // `/user` never says whether its email is verified.
                let emails: Vec<GitHubEmail> = self
                    .get_json(provider, &format!("{}/user/emails", GITHUB_API), &token)
                    .await?;
                apply_github_emails(&mut profile, emails);
                Ok(ProviderProfile::GitHub(profile))
            }
            Provider::Google => {
                let token = self
                    .exchange(provider, GOOGLE_TOKEN_URL, config, code, &redirect_uri)
                    .await?;
                let profile: GoogleProfile =
                    self.get_json(provider, GOOGLE_USERINFO_URL, &token).await?;
                Ok(ProviderProfile::Google(profile))
            }
            Provider::Local => Err(AuthError::not_found("local sign-in callback")),
        }
    }

    async fn exchange(
        &self,
        provider: Provider,
        token_url: &str,
        config: &ProviderConfig,
        code: &str,
        redirect_uri: &str,
    ) -> Result<String, AuthError> {
        let resp = self
            .http
            .post(token_url)
            .header(header::ACCEPT, "application/json")
            .form(&[
                ("client_id", config.client_id.as_str()),
                ("client_secret", config.client_secret.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| upstream(provider, "token request failed", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            warn!("{} token exchange returned {}", provider, status);
            return Err(AuthError::Upstream(format!(
                "{} token exchange failed ({})",
                provider, status
            )));
        }

        let token: AccessToken = resp
            .json()
            .await
            .map_err(|e| upstream(provider, "unreadable token response", e))?;
        Ok(token.access_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        provider: Provider,
        url: &str,
        access_token: &str,
    ) -> Result<T, AuthError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| upstream(provider, "profile request failed", e))?;

        if !resp.status().is_success() {
            return Err(AuthError::Upstream(format!(
                "{} profile request failed ({})",
                provider,
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| upstream(provider, "unreadable profile", e))
    }
}

fn upstream(provider: Provider, what: &str, err: reqwest::Error) -> AuthError {
    AuthError::Upstream(format!("{} {}: {}", provider, what, err))
}

/// Take the verified flag for the public address from the email list, or
/// pick an address from the list when the profile hides it.
fn apply_github_emails(profile: &mut GitHubProfile, emails: Vec<GitHubEmail>) {
    match profile.email.as_deref() {
        Some(public) => {
            profile.email_verified = emails
                .iter()
                .any(|e| e.verified && e.email.eq_ignore_ascii_case(public));
        }
        None => {
            debug!("GitHub user {} hides their email, using /user/emails", profile.login);
            if let Some(chosen) = pick_github_email(emails) {
                profile.email = Some(chosen.email);
                profile.email_verified = chosen.verified;
            }
        }
    }
}

/// Primary address first, then any verified one, then whatever is listed.
fn pick_github_email(emails: Vec<GitHubEmail>) -> Option<GitHubEmail> {
    let mut fallback = None;
    let mut verified = None;
    for email in emails {
        if email.primary {
            return Some(email);
        }
        if email.verified && verified.is_none() {
            verified = Some(email);
        } else if fallback.is_none() {
            fallback = Some(email);
        }
    }
    verified.or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OAuthClient {
        OAuthClient::new(OAuthSettings {
            github: Some(ProviderConfig {
                client_id: "gh-id".into(),
                client_secret: "gh-secret".into(),
                redirect_url: "https://tsuki.example/auth/oauth/github/callback".into(),
            }),
            ..Default::default()
        })
        .unwrap()
    }

    fn email(address: &str, primary: bool, verified: bool) -> GitHubEmail {
        GitHubEmail {
            email: address.into(),
            primary,
            verified,
        }
    }

    #[test]
    fn authorize_url_carries_the_login_flag() {
        let client = client();

        let signup = client.authorize_url(Provider::GitHub, LoginIntent::Signup).unwrap();
        let login = client.authorize_url(Provider::GitHub, LoginIntent::Login).unwrap();
        assert!(signup.as_str().starts_with(GITHUB_AUTHORIZE_URL));

        let redirect = |url: &Url| {
            url.query_pairs()
                .find(|(k, _)| k == "redirect_uri")
                .map(|(_, v)| v.into_owned())
                .unwrap()
        };
        assert_eq!(redirect(&signup), "https://tsuki.example/auth/oauth/github/callback");
        assert_eq!(
            redirect(&login),
            "https://tsuki.example/auth/oauth/github/callback?login=true"
        );
        assert!(login.query_pairs().any(|(k, v)| k == "client_id" && v == "gh-id"));
        assert!(!login.as_str().contains("gh-secret"));
    }

    #[test]
    fn unconfigured_providers_are_not_found() {
        let client = client();
        assert!(client.enabled(Provider::GitHub));
        assert!(!client.enabled(Provider::Google));
        assert!(!client.enabled(Provider::Local));
        assert!(matches!(
            client.authorize_url(Provider::Discord, LoginIntent::Signup),
            Err(AuthError::NotFound(_))
        ));
    }

    #[test]
    fn github_email_preference() {
        let chosen = pick_github_email(vec![
            email("old@example.com", false, false),
            email("work@example.com", false, true),
            email("main@example.com", true, true),
        ])
        .unwrap();
        assert_eq!(chosen.email, "main@example.com");

        let chosen = pick_github_email(vec![
            email("old@example.com", false, false),
            email("work@example.com", false, true),
        ])
        .unwrap();
        assert_eq!(chosen.email, "work@example.com");
        assert!(chosen.verified);

        assert!(pick_github_email(Vec::new()).is_none());
    }

    fn github_profile(public: Option<&str>) -> GitHubProfile {
        GitHubProfile {
            login: "octo".into(),
            email: public.map(str::to_string),
            avatar_url: None,
            email_verified: false,
        }
    }

    #[test]
    fn public_github_email_takes_its_flag_from_the_list() {
        let mut verified = github_profile(Some("Octo@Example.com"));
        apply_github_emails(
            &mut verified,
            vec![
                email("other@example.com", true, true),
                email("octo@example.com", false, true),
            ],
        );
        assert_eq!(verified.email.as_deref(), Some("Octo@Example.com"));
        assert!(verified.email_verified);

        let mut unverified = github_profile(Some("octo@example.com"));
        apply_github_emails(
            &mut unverified,
            vec![
                email("other@example.com", true, true),
                email("octo@example.com", false, false),
            ],
        );
        assert!(!unverified.email_verified);

        let mut unlisted = github_profile(Some("octo@example.com"));
        apply_github_emails(&mut unlisted, vec![email("other@example.com", true, true)]);
        assert!(!unlisted.email_verified);
    }

    #[test]
    fn hidden_github_email_is_filled_from_the_list() {
        let mut hidden = github_profile(None);
        apply_github_emails(&mut hidden, vec![email("main@example.com", true, true)]);
        assert_eq!(hidden.email.as_deref(), Some("main@example.com"));
        assert!(hidden.email_verified);
    }
}
