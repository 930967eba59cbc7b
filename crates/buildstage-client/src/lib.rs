//! buildstage-client: artifact server integration
//!
//! Implements the publish transport and artifact tagging seams of
//! `buildstage-core` over HTTP.

pub mod client;
pub mod config;
pub mod error;

pub use client::{ArtifactServerClient, BUILD_INFO_CONTENT_TYPE};
pub use config::ServerConfig;
pub use error::{ClientError, Result};
