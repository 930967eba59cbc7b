//! Artifact server connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

pub const URL_ENV: &str = "BUILDSTAGE_URL";
pub const USER_ENV: &str = "BUILDSTAGE_USER";
pub const PASSWORD_ENV: &str = "BUILDSTAGE_PASSWORD";
pub const ACCESS_TOKEN_ENV: &str = "BUILDSTAGE_ACCESS_TOKEN";
pub const TIMEOUT_ENV: &str = "BUILDSTAGE_TIMEOUT_SECS";

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Artifact server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL, e.g. `https://artifacts.example.com/artifactory`
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Bearer token. Takes precedence over user/password.
    pub access_token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let timeout = std::env::var(TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        ServerConfig {
            url: std::env::var(URL_ENV).unwrap_or_default(),
            user: std::env::var(USER_ENV).ok(),
            password: std::env::var(PASSWORD_ENV).ok(),
            access_token: std::env::var(ACCESS_TOKEN_ENV).ok(),
            timeout: Duration::from_secs(timeout),
        }
    }
}

impl ServerConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Config for `url` with no credentials.
    pub fn new(url: &str) -> Self {
        ServerConfig {
            url: url.to_string(),
            user: None,
            password: None,
            access_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn with_basic_auth(mut self, user: &str, password: &str) -> Self {
        self.user = Some(user.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn with_access_token(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL without trailing slashes. Fails when no URL is set.
    pub fn base_url(&self) -> Result<&str> {
        let url = self.url.trim().trim_end_matches('/');
        if url.is_empty() {
            return Err(ClientError::InvalidConfig(format!(
                "no server url configured (set {URL_ENV})"
            )));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ClientError::InvalidConfig(format!(
                "server url must be http(s): {url}"
            )));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_strips_trailing_slash() {
        let config = ServerConfig::new("https://artifacts.example.com/artifactory/");
        assert_eq!(
            config.base_url().unwrap(),
            "https://artifacts.example.com/artifactory"
        );
    }

    #[test]
    fn missing_url_is_rejected() {
        assert!(matches!(
            ServerConfig::new("").base_url(),
            Err(ClientError::InvalidConfig(_))
        ));
        assert!(ServerConfig::new("ftp://x").base_url().is_err());
    }

    #[test]
    fn builders_set_credentials() {
        let config = ServerConfig::new("http://localhost")
            .with_basic_auth("ci", "secret")
            .with_access_token("tok")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(config.user.as_deref(), Some("ci"));
        assert_eq!(config.access_token.as_deref(), Some("tok"));
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}
