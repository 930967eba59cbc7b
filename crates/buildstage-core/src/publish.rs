//! Assemble a staged build into one document, send it, and clean up.
//!
//! Ordering guarantees:
//! - Pattern errors surface before anything touches the network.
//! - Tagging failures are logged and counted, never fatal.
//! - Staging is purged only after the server confirmed the publish.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use crate::config::PublishConfig;
use crate::error::Result;
use crate::filter::EnvFilter;
use crate::identifier::BuildId;
use crate::merge::{staged_artifact_paths, MergeEngine};
use crate::model::BuildInfo;
use crate::obs;
use crate::staging::StagingStore;

/// Sends a merged document to the build-ingestion endpoint.
#[async_trait]
pub trait BuildInfoTransport: Send + Sync {
    /// Fails with `StagingError::Transmission` on network errors or a
    /// non-success response.
    async fn send_build_info(&self, build_info: &BuildInfo) -> Result<()>;
}

/// Attaches properties to an artifact already stored on the server.
#[async_trait]
pub trait ArtifactTagger: Send + Sync {
    async fn set_properties(&self, path: &str, properties: &str) -> Result<()>;
}

/// A merged document plus the artifact paths to tag with it.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledBuild {
    pub build_info: BuildInfo,
    pub artifact_paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaggingReport {
    pub tagged: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// Sent and purged.
    Published {
        modules: usize,
        tagging: TaggingReport,
    },
    /// Rendered only. Nothing sent, nothing purged.
    DryRun { document: String },
}

/// `build.name=..;build.number=..` as attached to tagged artifacts.
pub fn tagging_properties(build_info: &BuildInfo) -> String {
    format!(
        "build.name={};build.number={}",
        build_info.name, build_info.number
    )
}

/// Read everything staged for `id` and merge it under `config`.
///
/// Pattern errors surface before the staging directory is read.
pub fn assemble(
    store: &dyn StagingStore,
    config: &PublishConfig,
    id: &BuildId,
) -> Result<AssembledBuild> {
    let filter = EnvFilter::from_lists(&config.env_include, &config.env_exclude)?;
    let details = store.read_general_details(id)?;
    let partials = store.read_all_partials(id)?;
    let artifact_paths = staged_artifact_paths(&partials);

    let mut engine = MergeEngine::new(filter);
    if let Some(principal) = &config.principal {
        engine = engine.with_principal(principal.as_str());
    }
    if let Some(build_url) = &config.build_url {
        engine = engine.with_build_url(build_url.as_str());
    }
    let mut build_info = engine.merge(id, &details, partials);

    for fragment in store.read_generated_build_infos(id)? {
        build_info.append_fragment(fragment);
    }

    Ok(AssembledBuild {
        build_info,
        artifact_paths,
    })
}

/// Drives staging → filter → merge → transport for one build.
pub struct Publisher {
    store: Arc<dyn StagingStore>,
    transport: Arc<dyn BuildInfoTransport>,
    tagger: Option<Arc<dyn ArtifactTagger>>,
    config: PublishConfig,
}

impl Publisher {
    pub fn new(
        store: Arc<dyn StagingStore>,
        transport: Arc<dyn BuildInfoTransport>,
        config: PublishConfig,
    ) -> Self {
        Publisher {
            store,
            transport,
            tagger: None,
            config,
        }
    }

    pub fn with_tagger(mut self, tagger: Arc<dyn ArtifactTagger>) -> Self {
        self.tagger = Some(tagger);
        self
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    /// Read everything staged for `id` and merge it. Touches no network.
    pub fn assemble(&self, id: &BuildId) -> Result<AssembledBuild> {
        assemble(self.store.as_ref(), &self.config, id)
    }

    /// Assemble, tag, send, and purge `id`.
    pub async fn publish(&self, id: &BuildId) -> Result<PublishOutcome> {
        self.publish_inner(id).instrument(obs::build_span(id)).await
    }

    async fn publish_inner(&self, id: &BuildId) -> Result<PublishOutcome> {
        let assembled = self.assemble(id)?;

        if self.config.dry_run {
            let document = serde_json::to_string_pretty(&assembled.build_info)?;
            return Ok(PublishOutcome::DryRun { document });
        }

        let tagging = self
            .tag_artifacts(&assembled.build_info, &assembled.artifact_paths)
            .await;
        self.transmit(id, &assembled.build_info).await?;

        Ok(PublishOutcome::Published {
            modules: assembled.build_info.modules.len(),
            tagging,
        })
    }

    /// Send `build_info`; purge staging for `id` only if the send succeeded.
    pub async fn transmit(&self, id: &BuildId, build_info: &BuildInfo) -> Result<()> {
        if let Err(err) = self.transport.send_build_info(build_info).await {
            obs::emit_publish_failed(id, &err);
            return Err(err);
        }
        obs::emit_build_published(id, build_info.modules.len());
        self.store.purge(id)
    }

    /// Best-effort: each failed path is logged and counted.
    pub async fn tag_artifacts(&self, build_info: &BuildInfo, paths: &[String]) -> TaggingReport {
        let mut report = TaggingReport::default();
        let Some(tagger) = &self.tagger else {
            return report;
        };
        if paths.is_empty() {
            return report;
        }

        let properties = tagging_properties(build_info);
        for path in paths {
            match tagger.set_properties(path, &properties).await {
                Ok(()) => report.tagged += 1,
                Err(err) => {
                    obs::emit_tagging_failed(path, &err);
                    report.failed += 1;
                }
            }
        }
        obs::emit_tagging_finished(
            &build_info.name,
            &build_info.number,
            report.tagged,
            report.failed,
        );
        report
    }
}
