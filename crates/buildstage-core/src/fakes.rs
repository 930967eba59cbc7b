//! In-memory fakes for the publish seams (testing only)
//!
//! Provides `MemoryTransport`, `FailingTransport` and `MemoryTagger` that
//! satisfy the transport and tagging contracts without a server.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Result, StagingError};
use crate::model::BuildInfo;
use crate::publish::{ArtifactTagger, BuildInfoTransport};

// ---------------------------------------------------------------------------
// MemoryTransport
// ---------------------------------------------------------------------------

/// Records every document it is asked to send.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    published: Mutex<Vec<BuildInfo>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<BuildInfo> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildInfoTransport for MemoryTransport {
    async fn send_build_info(&self, build_info: &BuildInfo) -> Result<()> {
        self.published.lock().unwrap().push(build_info.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FailingTransport
// ---------------------------------------------------------------------------

/// Rejects every document with a fixed status and message.
#[derive(Debug)]
pub struct FailingTransport {
    status: u16,
    message: String,
}

impl FailingTransport {
    pub fn new(status: u16, message: &str) -> Self {
        FailingTransport {
            status,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl BuildInfoTransport for FailingTransport {
    async fn send_build_info(&self, _build_info: &BuildInfo) -> Result<()> {
        Err(StagingError::Transmission {
            status: Some(self.status),
            message: self.message.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryTagger
// ---------------------------------------------------------------------------

/// Records successful tagging calls; fails on a configured set of paths.
#[derive(Debug, Default)]
pub struct MemoryTagger {
    tagged: Mutex<Vec<(String, String)>>,
    failing: HashSet<String>,
}

impl MemoryTagger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MemoryTagger {
            tagged: Mutex::new(Vec::new()),
            failing: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// `(path, properties)` pairs that were tagged, in call order.
    pub fn tagged(&self) -> Vec<(String, String)> {
        self.tagged.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactTagger for MemoryTagger {
    async fn set_properties(&self, path: &str, properties: &str) -> Result<()> {
        if self.failing.contains(path) {
            return Err(StagingError::Transmission {
                status: Some(404),
                message: format!("no such item: {path}"),
            });
        }
        self.tagged
            .lock()
            .unwrap()
            .push((path.to_string(), properties.to_string()));
        Ok(())
    }
}
