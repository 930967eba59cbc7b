//! Error taxonomy for the staging and publish pipeline.

use std::path::PathBuf;

/// Errors produced while staging, merging or publishing build-info.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    /// The general-details record is missing: no producer ever ran for this build.
    #[error("build {name}/{number} is not initialized: no general details were staged")]
    UninitializedBuild { name: String, number: String },

    /// A single partial file could not be parsed. Skipped by readers.
    #[error("corrupt partial {path}: {source}")]
    CorruptPartial {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid environment pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// The publish call failed on the network or the server rejected it.
    #[error("{}", transmission_message(.status, .message))]
    Transmission { status: Option<u16>, message: String },

    #[error("staging io error at {path}: {source}")]
    StagingIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid build identifier: {0}")]
    InvalidBuildId(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn transmission_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("server responded with {code}: {message}"),
        None => format!("transmission failed: {message}"),
    }
}

impl StagingError {
    /// Wrap an io error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StagingError::StagingIo {
            path: path.into(),
            source,
        }
    }

    /// Whether staged data survives this error and the publish can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StagingError::Transmission { .. })
    }
}

/// Result type for staging operations.
pub type Result<T> = std::result::Result<T, StagingError>;
