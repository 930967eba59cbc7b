//! HTTP client for the artifact server
//!
//! Publishes merged build-info documents and attaches build properties to
//! artifacts that were uploaded during the build.

use async_trait::async_trait;
use buildstage_core::publish::{ArtifactTagger, BuildInfoTransport};
use buildstage_core::BuildInfo;
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::{ClientError, Result};

/// Content type the build endpoint expects.
pub const BUILD_INFO_CONTENT_TYPE: &str = "application/vnd.org.jfrog.artifactory+json";

const BUILD_ENDPOINT: &str = "api/build";
const STORAGE_ENDPOINT: &str = "api/storage";
const PATTERN_ARTIFACTS_ENDPOINT: &str = "api/build/patternArtifacts";

/// Build number alias resolved by the server to the most recent build.
const LATEST: &str = "LATEST";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildRef<'a> {
    build_name: &'a str,
    build_number: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolvedBuild {
    #[serde(default)]
    build_number: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildInfoResponse {
    build_info: BuildInfo,
}

/// Artifact server client
#[derive(Debug, Clone)]
pub struct ArtifactServerClient {
    config: ServerConfig,
    base_url: String,
    http_client: reqwest::Client,
}

impl ArtifactServerClient {
    /// Create a new client. Fails when the URL is missing or invalid.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let base_url = config.base_url()?.to_string();
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("buildstage/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;

        Ok(ArtifactServerClient {
            config,
            base_url,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(ServerConfig::from_env())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.config.access_token {
            request.bearer_auth(token)
        } else if let Some(user) = &self.config.user {
            request.basic_auth(user, self.config.password.as_ref())
        } else {
            request
        }
    }

    /// Map a non-success response to `ClientError::Status` carrying its body.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let body = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("").to_string()
        } else {
            body
        };
        Err(ClientError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// `PUT <url>/api/build` with the document as body.
    pub async fn publish_build_info(&self, build_info: &BuildInfo) -> Result<()> {
        let url = format!("{}/{}", self.base_url, BUILD_ENDPOINT);
        let body = serde_json::to_vec(build_info)?;
        debug!(url = %url, bytes = body.len(), "sending build info");

        let request = self
            .http_client
            .put(&url)
            .header(CONTENT_TYPE, BUILD_INFO_CONTENT_TYPE)
            .body(body);
        let response = self.authorize(request).send().await?;
        Self::check(response).await?;

        info!(
            build = %format!("{}/{}", build_info.name, build_info.number),
            "build info published"
        );
        Ok(())
    }

    /// `PUT <url>/api/storage/<path>?properties=<properties>`.
    pub async fn set_item_properties(&self, path: &str, properties: &str) -> Result<()> {
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            STORAGE_ENDPOINT,
            path.trim_start_matches('/')
        );
        debug!(url = %url, properties = %properties, "setting item properties");

        let request = self
            .http_client
            .put(&url)
            .query(&[("properties", properties)]);
        let response = self.authorize(request).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Number of the most recent published build named `name`.
    pub async fn latest_build_number(&self, name: &str) -> Result<Option<String>> {
        let url = format!("{}/{}", self.base_url, PATTERN_ARTIFACTS_ENDPOINT);
        let body = [BuildRef {
            build_name: name,
            build_number: LATEST,
        }];
        debug!(url = %url, build = %name, "resolving latest build number");

        let request = self.http_client.post(&url).json(&body);
        let response = self.authorize(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = Self::check(response).await?.bytes().await?;
        let resolved: Vec<ResolvedBuild> = serde_json::from_slice(&bytes)?;
        Ok(resolved
            .into_iter()
            .map(|b| b.build_number)
            .find(|number| !number.is_empty()))
    }

    /// `GET <url>/api/build/<name>/<number>`. `None` when the server has no
    /// such build.
    pub async fn get_build_info(&self, name: &str, number: &str) -> Result<Option<BuildInfo>> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::InvalidConfig(format!("invalid url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidConfig(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(BUILD_ENDPOINT.split('/'))
            .extend([name, number]);
        debug!(url = %url, "fetching build info");

        let response = self.authorize(self.http_client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = Self::check(response).await?.bytes().await?;
        let found: BuildInfoResponse = serde_json::from_slice(&bytes)?;
        Ok(Some(found.build_info))
    }

    /// VCS revision of the most recent published build named `name`, used as
    /// the lower bound when collecting issues from commits.
    pub async fn latest_vcs_revision(&self, name: &str) -> Result<Option<String>> {
        let Some(number) = self.latest_build_number(name).await? else {
            return Ok(None);
        };
        let revision = self
            .get_build_info(name, &number)
            .await?
            .map(|info| info.vcs_revision)
            .filter(|revision| !revision.is_empty());
        Ok(revision)
    }
}

#[async_trait]
impl BuildInfoTransport for ArtifactServerClient {
    async fn send_build_info(&self, build_info: &BuildInfo) -> buildstage_core::Result<()> {
        Ok(self.publish_build_info(build_info).await?)
    }
}

#[async_trait]
impl ArtifactTagger for ArtifactServerClient {
    async fn set_properties(&self, path: &str, properties: &str) -> buildstage_core::Result<()> {
        Ok(self.set_item_properties(path, properties).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_requires_url() {
        assert!(matches!(
            ArtifactServerClient::new(ServerConfig::new("")),
            Err(ClientError::InvalidConfig(_))
        ));
    }

    #[test]
    fn client_normalizes_base_url() {
        let config = ServerConfig::new("http://localhost:8081/art/");
        let client = ArtifactServerClient::new(config).unwrap();
        assert_eq!(client.base_url, "http://localhost:8081/art");
    }
}
