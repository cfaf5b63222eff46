use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use tsuki_api::oauth::{OAuthSettings, ProviderConfig};

const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TSUKI_SECRET_KEY is unset or still a placeholder")]
    InsecureSecret,

    #[error("{name} is not valid: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug)]
pub struct Config {
    pub secret_key: String,
    pub issuer: String,
    pub base_url: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub oauth: OAuthSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let secret_key = var("TSUKI_SECRET_KEY").unwrap_or_default();
        if secret_key.is_empty() || PLACEHOLDER_SECRETS.contains(&secret_key.as_str()) {
            return Err(ConfigError::InsecureSecret);
        }

        let host = var("TSUKI_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = var("TSUKI_PORT").unwrap_or_else(|| "3000".into());
        let port: u16 = port.parse().map_err(|_| ConfigError::Invalid {
            name: "TSUKI_PORT",
            value: port.clone(),
        })?;
        let addr_raw = format!("{}:{}", host, port);
        let addr: SocketAddr = addr_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "TSUKI_HOST",
            value: host.clone(),
        })?;

        let provider = |prefix: &str| -> Option<ProviderConfig> {
            Some(ProviderConfig {
                client_id: var(&format!("TSUKI_{}_CLIENT_ID", prefix))?,
                client_secret: var(&format!("TSUKI_{}_CLIENT_SECRET", prefix))?,
                redirect_url: var(&format!("TSUKI_{}_REDIRECT_URL", prefix))?,
            })
        };

        Ok(Self {
            secret_key,
            issuer: var("TSUKI_ISSUER").unwrap_or_else(|| "tsuki".into()),
            base_url: var("TSUKI_BASE_URL").unwrap_or_else(|| "http://localhost:3000".into()),
            db_path: PathBuf::from(var("TSUKI_DB_PATH").unwrap_or_else(|| "tsuki.db".into())),
            addr,
            oauth: OAuthSettings {
                discord: provider("DISCORD"),
                github: provider("GITHUB"),
                google: provider("GOOGLE"),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("TSUKI_SECRET_KEY", "s3cr3t-for-tests")]).unwrap();
        assert_eq!(cfg.issuer, "tsuki");
        assert_eq!(cfg.base_url, "http://localhost:3000");
        assert_eq!(cfg.db_path, PathBuf::from("tsuki.db"));
        assert_eq!(cfg.addr.port(), 3000);
        assert!(cfg.oauth.github.is_none());
    }

    #[test]
    fn placeholder_or_missing_secret_is_refused() {
        assert!(matches!(config(&[]), Err(ConfigError::InsecureSecret)));
        assert!(matches!(
            config(&[("TSUKI_SECRET_KEY", "dev-secret-change-me")]),
            Err(ConfigError::InsecureSecret)
        ));
    }

    #[test]
    fn provider_needs_all_three_settings() {
        let cfg = config(&[
            ("TSUKI_SECRET_KEY", "s3cr3t-for-tests"),
            ("TSUKI_GITHUB_CLIENT_ID", "id"),
            ("TSUKI_GITHUB_CLIENT_SECRET", "secret"),
            ("TSUKI_GITHUB_REDIRECT_URL", "https://tsuki.example/auth/oauth/github/callback"),
            ("TSUKI_GOOGLE_CLIENT_ID", "id"),
        ])
        .unwrap();
        assert!(cfg.oauth.github.is_some());
        assert!(cfg.oauth.google.is_none());
        assert!(cfg.oauth.discord.is_none());
    }

    #[test]
    fn bad_port_is_reported() {
        assert!(matches!(
            config(&[("TSUKI_SECRET_KEY", "s3cr3t-for-tests"), ("TSUKI_PORT", "http")]),
            Err(ConfigError::Invalid { name: "TSUKI_PORT", .. })
        ));
    }
}
