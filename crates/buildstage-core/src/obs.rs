//! Structured observability hooks for the staging lifecycle.
//!
//! This module provides:
//! - Build-scoped tracing spans via `BuildSpan` (sync) and `build_span` (async)
//! - Emission functions for key lifecycle events: partial appended or skipped,
//!   merge finished, tagging, publish succeeded or failed, staging purged
//!
//! Events are emitted at `info!` level except skips and failures (`warn!`).
//! For JSON output, run the CLI with `--json`.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::identifier::BuildId;
use crate::model::BuildInfo;

/// RAII guard that enters a build-scoped span for the rest of a sync scope.
///
/// # Example
///
/// ```ignore
/// let _span = BuildSpan::enter(&id);
/// // every event below carries build = "my-build/42"
/// ```
pub struct BuildSpan {
    _span: tracing::span::EnteredSpan,
}

impl BuildSpan {
    pub fn enter(id: &BuildId) -> Self {
        Self {
            _span: build_span(id).entered(),
        }
    }
}

/// Span tagged with the build, for instrumenting futures.
pub fn build_span(id: &BuildId) -> tracing::Span {
    tracing::info_span!("buildstage.build", build = %id)
}

pub fn emit_general_details_written(id: &BuildId, started: &str) {
    info!(event = "staging.details_written", build = %id, started = %started);
}

pub fn emit_partial_appended(id: &BuildId, kind: &str, path: &Path) {
    debug!(
        event = "staging.partial_appended",
        build = %id,
        kind = %kind,
        path = %path.display(),
    );
}

/// Emit event: a staged file could not be parsed and was left out.
pub fn emit_partial_skipped(id: &BuildId, error: &dyn std::fmt::Display) {
    warn!(event = "staging.partial_skipped", build = %id, error = %error);
}

pub fn emit_merge_finished(id: &BuildId, info: &BuildInfo) {
    info!(
        event = "merge.finished",
        build = %id,
        modules = info.modules.len(),
        artifacts = info.artifact_count(),
        dependencies = info.dependency_count(),
        env_keys = info.properties.len(),
    );
}

pub fn emit_tagging_failed(path: &str, error: &dyn std::fmt::Display) {
    warn!(event = "tagging.failed", path = %path, error = %error);
}

pub fn emit_tagging_finished(name: &str, number: &str, tagged: usize, failed: usize) {
    info!(
        event = "tagging.finished",
        build = %format!("{name}/{number}"),
        tagged = tagged,
        failed = failed,
    );
}

pub fn emit_build_published(id: &BuildId, modules: usize) {
    info!(event = "publish.succeeded", build = %id, modules = modules);
}

/// Emit event: publish failed; staged data is kept for a retry.
pub fn emit_publish_failed(id: &BuildId, error: &dyn std::fmt::Display) {
    warn!(event = "publish.failed", build = %id, error = %error);
}

pub fn emit_staging_purged(id: &BuildId) {
    info!(event = "staging.purged", build = %id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_span_create() {
        let id = BuildId::new("b", "1").unwrap();
        let _span = BuildSpan::enter(&id);
        emit_staging_purged(&id);
    }
}
