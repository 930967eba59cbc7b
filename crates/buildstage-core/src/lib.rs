//! buildstage core library
//!
//! Stages per-step build information on disk and merges it into one
//! build-info document at publish time.

pub mod config;
pub mod error;
pub mod fakes;
pub mod files;
pub mod filter;
pub mod git;
pub mod identifier;
pub mod issues;
pub mod merge;
pub mod model;
pub mod obs;
pub mod producers;
pub mod publish;
pub mod staging;
pub mod telemetry;

/// Crate version, reported as the agent version in published documents.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::{PublishConfig, StagingConfig};
pub use error::{Result, StagingError};
pub use filter::{filter, EnvFilter};
pub use identifier::BuildId;
pub use issues::IssuesConfig;
pub use merge::MergeEngine;
pub use model::{
    AffectedIssue, Agent, Artifact, BuildInfo, Dependency, Env, GeneralDetails, IssueTracker,
    Issues, Module, PartialPayload, PartialRecord, StagedArtifact, Vcs,
};
pub use producers::{
    add_artifacts, add_dependencies, add_dependencies_from_paths, add_git, add_git_with_issues,
    add_vcs, build_properties, collect_env, collect_env_from, DependencyCollection,
};
pub use publish::{
    ArtifactTagger, AssembledBuild, BuildInfoTransport, PublishOutcome, Publisher, TaggingReport,
};
pub use staging::fs::FsStagingStore;
pub use staging::StagingStore;
pub use telemetry::init_tracing;
