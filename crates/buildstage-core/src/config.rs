//! Environment-driven configuration for staging and publishing.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Overrides the staging root (default: `<temp>/buildstage/builds`).
pub const HOME_ENV: &str = "BUILDSTAGE_HOME";
pub const ENV_INCLUDE_ENV: &str = "BUILDSTAGE_ENV_INCLUDE";
pub const ENV_EXCLUDE_ENV: &str = "BUILDSTAGE_ENV_EXCLUDE";
pub const BUILD_URL_ENV: &str = "BUILDSTAGE_BUILD_URL";

pub const DEFAULT_ENV_INCLUDE: &str = "*";
pub const DEFAULT_ENV_EXCLUDE: &str = "*password*;*secret*;*key*;*token*";

/// Where staged builds live on local disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingConfig {
    pub base_dir: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        StagingConfig {
            base_dir: std::env::var_os(HOME_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(default_base_dir),
        }
    }
}

impl StagingConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        StagingConfig {
            base_dir: base_dir.into(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    std::env::temp_dir().join("buildstage").join("builds")
}

/// Options for assembling and publishing one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Semicolon-separated include globs for environment keys.
    pub env_include: String,
    /// Semicolon-separated exclude globs for environment keys.
    pub env_exclude: String,
    /// CI job URL recorded as the document's `url`.
    pub build_url: Option<String>,
    /// Server user recorded as the document's principal.
    pub principal: Option<String>,
    /// Render the document instead of sending it.
    pub dry_run: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        PublishConfig {
            env_include: std::env::var(ENV_INCLUDE_ENV)
                .unwrap_or_else(|_| DEFAULT_ENV_INCLUDE.to_string()),
            env_exclude: std::env::var(ENV_EXCLUDE_ENV)
                .unwrap_or_else(|_| DEFAULT_ENV_EXCLUDE.to_string()),
            build_url: std::env::var(BUILD_URL_ENV).ok(),
            principal: None,
            dry_run: false,
        }
    }
}

impl PublishConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn with_env_include(mut self, patterns: &str) -> Self {
        self.env_include = patterns.to_string();
        self
    }

    pub fn with_env_exclude(mut self, patterns: &str) -> Self {
        self.env_exclude = patterns.to_string();
        self
    }

    pub fn with_build_url(mut self, url: &str) -> Self {
        self.build_url = Some(url.to_string());
        self
    }

    pub fn with_principal(mut self, principal: &str) -> Self {
        self.principal = Some(principal.to_string());
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_setters() {
        let config = PublishConfig::from_env()
            .with_env_include("BUILD_*")
            .with_env_exclude("*secret*")
            .with_build_url("https://ci.example.com/42")
            .with_principal("ci")
            .with_dry_run(true);

        assert_eq!(config.env_include, "BUILD_*");
        assert_eq!(config.env_exclude, "*secret*");
        assert_eq!(config.build_url.as_deref(), Some("https://ci.example.com/42"));
        assert_eq!(config.principal.as_deref(), Some("ci"));
        assert!(config.dry_run);
    }

    #[test]
    fn staging_config_explicit_dir() {
        let config = StagingConfig::new("/var/lib/buildstage");
        assert_eq!(config.base_dir, PathBuf::from("/var/lib/buildstage"));
    }

    #[test]
    fn default_exclude_hides_credentials() {
        assert!(DEFAULT_ENV_EXCLUDE.contains("*password*"));
        assert!(DEFAULT_ENV_EXCLUDE.contains("*token*"));
    }
}
