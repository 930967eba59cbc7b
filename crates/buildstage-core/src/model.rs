//! Build-info data model: staged partial records and the published document.
//!
//! Partials are what producers write into the staging directory, one per
//! invocation. [`BuildInfo`] is what the merge engine produces from them and
//! what the publisher sends to the server. Field names on the wire follow the
//! server's build-info JSON schema (`camelCase`).

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Local, Utc};
use serde::{Deserialize, Serialize};

/// Build-level environment properties (`buildInfo.env.*` keys).
pub type Env = BTreeMap<String, String>;

/// Key prefix for collected environment variables.
pub const ENV_PREFIX: &str = "buildInfo.env.";

/// Name reported in `buildAgent` for builds not driven by a build-tool extractor.
pub const GENERIC_BUILD_AGENT: &str = "GENERIC";

/// Name reported in `agent`.
pub const AGENT_NAME: &str = "buildstage";

/// Render format for [`BuildInfo::started`], e.g. `2026-10-18T09:15:02.120+0200`.
pub const STARTED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

fn is_empty(s: &str) -> bool {
    s.is_empty()
}

/// A published artifact. Identity is `name|sha1|md5`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub sha1: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub md5: String,
}

impl Artifact {
    pub fn new(name: impl Into<String>, sha1: impl Into<String>, md5: impl Into<String>) -> Self {
        Artifact {
            name: name.into(),
            sha1: sha1.into(),
            md5: md5.into(),
        }
    }

    /// Canonical deduplication key.
    pub fn signature(&self) -> String {
        format!("{}|{}|{}", self.name, self.sha1, self.md5)
    }
}

/// An artifact as staged by an upload producer.
///
/// `path` is the repository path the artifact was deployed to. It is used
/// to tag the artifact with build properties and is dropped from the
/// published document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedArtifact {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub sha1: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub md5: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl StagedArtifact {
    pub fn new(name: impl Into<String>, sha1: impl Into<String>, md5: impl Into<String>) -> Self {
        StagedArtifact {
            name: name.into(),
            sha1: sha1.into(),
            md5: md5.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn to_artifact(&self) -> Artifact {
        Artifact::new(&self.name, &self.sha1, &self.md5)
    }
}

/// A build dependency. Identity is `id|sha1|md5|scopes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub sha1: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub md5: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl Dependency {
    pub fn new(id: impl Into<String>, sha1: impl Into<String>, md5: impl Into<String>) -> Self {
        Dependency {
            id: id.into(),
            sha1: sha1.into(),
            md5: md5.into(),
            scopes: Vec::new(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Canonical deduplication key.
    pub fn signature(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.id,
            self.sha1,
            self.md5,
            self.scopes.join(",")
        )
    }
}

/// Version control coordinates of the build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vcs {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub revision: String,
    /// Tracker issues mentioned in the commits of this build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<Issues>,
}

impl Vcs {
    pub fn new(url: impl Into<String>, revision: impl Into<String>) -> Self {
        Vcs {
            url: url.into(),
            revision: revision.into(),
            issues: None,
        }
    }

    pub fn with_issues(mut self, issues: Issues) -> Self {
        self.issues = Some(issues);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTracker {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub version: String,
}

/// One issue key referenced by a commit message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedIssue {
    pub key: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub summary: String,
    #[serde(default)]
    pub aggregated: bool,
}

/// Issue-tracker section of a build.
///
/// The tracker and the aggregation flags are taken from the latest record
/// that carries them; affected issues accumulate by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker: Option<IssueTracker>,
    #[serde(default)]
    pub aggregate_build_issues: bool,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub aggregation_build_status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_issues: Vec<AffectedIssue>,
}

impl Issues {
    pub fn tracker_name(&self) -> &str {
        self.tracker.as_ref().map_or("", |t| t.name.as_str())
    }
}

/// The one populated payload of a [`PartialRecord`].
///
/// Externally tagged and flattened into the record, so a staged file holds
/// exactly one of the `artifacts`, `dependencies`, `env` or `vcs` keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PartialPayload {
    Artifacts(Vec<StagedArtifact>),
    Dependencies(Vec<Dependency>),
    Env(Env),
    Vcs(Vcs),
}

impl PartialPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            PartialPayload::Artifacts(_) => "artifacts",
            PartialPayload::Dependencies(_) => "dependencies",
            PartialPayload::Env(_) => "env",
            PartialPayload::Vcs(_) => "vcs",
        }
    }
}

/// One producer's contribution to a build.
///
/// Parsing fails unless exactly one payload key is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawPartialRecord")]
pub struct PartialRecord {
    /// Creation time in epoch milliseconds. Only used to order the merge.
    pub timestamp: i64,
    /// Target module. Empty means "the module named after the build".
    #[serde(default, skip_serializing_if = "is_empty")]
    pub module_id: String,
    #[serde(flatten)]
    pub payload: PartialPayload,
}

/// Wire shape of a staged partial before the payload count is checked.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPartialRecord {
    timestamp: i64,
    #[serde(default)]
    module_id: String,
    artifacts: Option<Vec<StagedArtifact>>,
    dependencies: Option<Vec<Dependency>>,
    env: Option<Env>,
    vcs: Option<Vcs>,
}

impl TryFrom<RawPartialRecord> for PartialRecord {
    type Error = String;

    fn try_from(raw: RawPartialRecord) -> std::result::Result<Self, Self::Error> {
        let mut payloads = Vec::with_capacity(1);
        if let Some(artifacts) = raw.artifacts {
            payloads.push(PartialPayload::Artifacts(artifacts));
        }
        if let Some(dependencies) = raw.dependencies {
            payloads.push(PartialPayload::Dependencies(dependencies));
        }
        if let Some(env) = raw.env {
            payloads.push(PartialPayload::Env(env));
        }
        if let Some(vcs) = raw.vcs {
            payloads.push(PartialPayload::Vcs(vcs));
        }
        if payloads.len() != 1 {
            let kinds: Vec<&str> = payloads.iter().map(PartialPayload::kind).collect();
            return Err(format!(
                "expected exactly one of artifacts, dependencies, env or vcs, found [{}]",
                kinds.join(", ")
            ));
        }
        let payload = payloads.remove(0);
        Ok(PartialRecord {
            timestamp: raw.timestamp,
            module_id: raw.module_id,
            payload,
        })
    }
}

impl PartialRecord {
    /// Create a record stamped with the current time.
    pub fn new(payload: PartialPayload) -> Self {
        Self::at(Utc::now().timestamp_millis(), payload)
    }

    /// Create a record with an explicit timestamp.
    pub fn at(timestamp: i64, payload: PartialPayload) -> Self {
        PartialRecord {
            timestamp,
            module_id: String::new(),
            payload,
        }
    }

    pub fn artifacts(artifacts: Vec<StagedArtifact>) -> Self {
        Self::new(PartialPayload::Artifacts(artifacts))
    }

    pub fn dependencies(dependencies: Vec<Dependency>) -> Self {
        Self::new(PartialPayload::Dependencies(dependencies))
    }

    pub fn env(env: Env) -> Self {
        Self::new(PartialPayload::Env(env))
    }

    pub fn vcs(vcs: Vcs) -> Self {
        Self::new(PartialPayload::Vcs(vcs))
    }

    pub fn with_module(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = module_id.into();
        self
    }
}

/// The one-time record written by the first producer of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralDetails {
    pub started_at: DateTime<FixedOffset>,
}

impl GeneralDetails {
    pub fn now() -> Self {
        GeneralDetails {
            started_at: Local::now().fixed_offset(),
        }
    }

    pub fn started_millis(&self) -> i64 {
        self.started_at.timestamp_millis()
    }

    pub fn started_formatted(&self) -> String {
        self.started_at.format(STARTED_FORMAT).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub version: String,
}

impl Agent {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Agent {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// A named grouping of artifacts and dependencies within one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub properties: serde_json::Value,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl Module {
    pub fn new(id: impl Into<String>) -> Self {
        Module {
            id: id.into(),
            properties: serde_json::Value::Null,
            artifacts: Vec::new(),
            dependencies: Vec::new(),
        }
    }
}

/// The merged build-info document sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub name: String,
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<Agent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_agent: Option<Agent>,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub started: String,
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Env,
    #[serde(
        rename = "artifactoryPrincipal",
        default,
        skip_serializing_if = "is_empty"
    )]
    pub principal: String,
    #[serde(rename = "url", default, skip_serializing_if = "is_empty")]
    pub build_url: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub vcs_url: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub vcs_revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<Issues>,
}

impl BuildInfo {
    /// An empty document for `name`/`number` carrying this crate's agent info.
    pub fn new(name: impl Into<String>, number: impl Into<String>) -> Self {
        let version = crate::VERSION;
        BuildInfo {
            name: name.into(),
            number: number.into(),
            agent: Some(Agent::new(AGENT_NAME, version)),
            build_agent: Some(Agent::new(GENERIC_BUILD_AGENT, version)),
            started: String::new(),
            modules: Vec::new(),
            properties: Env::new(),
            principal: String::new(),
            build_url: String::new(),
            vcs_url: String::new(),
            vcs_revision: String::new(),
            issues: None,
        }
    }

    pub fn set_vcs(&mut self, vcs: &Vcs) {
        self.vcs_url = vcs.url.clone();
        self.vcs_revision = vcs.revision.clone();
    }

    /// Append the modules of an out-of-band fragment as-is.
    pub fn append_fragment(&mut self, fragment: BuildInfo) {
        self.modules.extend(fragment.modules);
    }

    pub fn artifact_count(&self) -> usize {
        self.modules.iter().map(|m| m.artifacts.len()).sum()
    }

    pub fn dependency_count(&self) -> usize {
        self.modules.iter().map(|m| m.dependencies.len()).sum()
    }
}
