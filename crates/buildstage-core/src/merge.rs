//! Reduce staged partials into one build-info document.
//!
//! Partials are processed in ascending timestamp order (stable, so ties
//! keep enumeration order). Artifacts and dependencies are deduplicated per
//! module by signature and emitted sorted by signature; environment entries
//! and the VCS record follow last-processed-wins. Issues attached to VCS
//! records keep the latest tracker settings and accumulate affected issues
//! by key.

use std::collections::BTreeMap;

use tracing::warn;

use crate::filter::EnvFilter;
use crate::identifier::BuildId;
use crate::model::{
    AffectedIssue, Artifact, BuildInfo, Dependency, Env, GeneralDetails, IssueTracker, Issues,
    Module, PartialPayload, PartialRecord, Vcs,
};
use crate::obs;

#[derive(Debug, Default)]
struct ModuleAccumulator {
    artifacts: BTreeMap<String, Artifact>,
    dependencies: BTreeMap<String, Dependency>,
}

impl ModuleAccumulator {
    fn into_module(self, id: String) -> Module {
        let mut module = Module::new(id);
        module.artifacts = self.artifacts.into_values().collect();
        module.dependencies = self.dependencies.into_values().collect();
        module
    }
}

#[derive(Debug, Default)]
struct IssuesAccumulator {
    tracker: Option<IssueTracker>,
    aggregate_build_issues: bool,
    aggregation_build_status: String,
    affected: BTreeMap<String, AffectedIssue>,
}

impl IssuesAccumulator {
    fn absorb(&mut self, issues: Issues) {
        self.tracker = issues.tracker;
        self.aggregate_build_issues = issues.aggregate_build_issues;
        self.aggregation_build_status = issues.aggregation_build_status;
        for issue in issues.affected_issues {
            self.affected.insert(issue.key.clone(), issue);
        }
    }

    /// `None` unless a named tracker was seen.
    fn into_issues(self) -> Option<Issues> {
        let issues = Issues {
            tracker: self.tracker,
            aggregate_build_issues: self.aggregate_build_issues,
            aggregation_build_status: self.aggregation_build_status,
            affected_issues: self.affected.into_values().collect(),
        };
        (!issues.tracker_name().is_empty()).then_some(issues)
    }
}

/// Merges partials for one build.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    filter: EnvFilter,
    principal: String,
    build_url: String,
}

impl MergeEngine {
    pub fn new(filter: EnvFilter) -> Self {
        MergeEngine {
            filter,
            principal: String::new(),
            build_url: String::new(),
        }
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = principal.into();
        self
    }

    pub fn with_build_url(mut self, build_url: impl Into<String>) -> Self {
        self.build_url = build_url.into();
        self
    }

    /// Merge `partials` into a fresh document for `id`.
    pub fn merge(
        &self,
        id: &BuildId,
        details: &GeneralDetails,
        mut partials: Vec<PartialRecord>,
    ) -> BuildInfo {
        partials.sort_by_key(|p| p.timestamp);

        let mut modules: BTreeMap<String, ModuleAccumulator> = BTreeMap::new();
        let mut env = Env::new();
        let mut vcs: Option<Vcs> = None;
        let mut issues = IssuesAccumulator::default();

        for partial in partials {
            let module_id = if partial.module_id.is_empty() {
                id.name().to_string()
            } else {
                partial.module_id
            };

            match partial.payload {
                PartialPayload::Artifacts(artifacts) => {
                    let acc = modules.entry(module_id).or_default();
                    for staged in &artifacts {
                        let artifact = staged.to_artifact();
                        acc.artifacts.insert(artifact.signature(), artifact);
                    }
                }
                PartialPayload::Dependencies(dependencies) => {
                    let acc = modules.entry(module_id).or_default();
                    for dependency in dependencies {
                        acc.dependencies.insert(dependency.signature(), dependency);
                    }
                }
                PartialPayload::Env(entries) => {
                    env.extend(self.filter.apply(&entries));
                }
                PartialPayload::Vcs(mut next) => {
                    if let Some(found) = next.issues.take() {
                        issues.absorb(found);
                    }
                    let changed =
                        |prev: &&Vcs| prev.url != next.url || prev.revision != next.revision;
                    if let Some(prev) = vcs.as_ref().filter(changed) {
                        warn!(
                            event = "merge.vcs_overwritten",
                            build = %id,
                            previous = %prev.revision,
                            revision = %next.revision,
                        );
                    }
                    vcs = Some(next);
                }
            }
        }

        let mut info = BuildInfo::new(id.name(), id.number());
        info.started = details.started_formatted();
        info.principal = self.principal.clone();
        info.build_url = self.build_url.clone();
        info.properties = env;
        if let Some(vcs) = vcs {
            info.set_vcs(&vcs);
        }
        info.issues = issues.into_issues();
        info.modules = modules
            .into_iter()
            .map(|(module_id, acc)| acc.into_module(module_id))
            .collect();

        obs::emit_merge_finished(id, &info);
        info
    }
}

/// Artifact repository paths carried by staged artifacts, in merge order.
pub fn staged_artifact_paths(partials: &[PartialRecord]) -> Vec<String> {
    let mut sorted: Vec<&PartialRecord> = partials.iter().collect();
    sorted.sort_by_key(|p| p.timestamp);

    let mut paths = Vec::new();
    for partial in sorted {
        if let PartialPayload::Artifacts(artifacts) = &partial.payload {
            for artifact in artifacts {
                if let Some(path) = &artifact.path {
                    if !paths.contains(path) {
                        paths.push(path.clone());
                    }
                }
            }
        }
    }
    paths
}
