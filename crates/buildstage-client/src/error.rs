//! Error types for buildstage-client

use buildstage_core::StagingError;
use thiserror::Error;

/// Errors talking to the artifact server
#[derive(Error, Debug)]
pub enum ClientError {
    /// Missing or malformed server settings
    #[error("invalid server configuration: {0}")]
    InvalidConfig(String),

    /// Connection, timeout or protocol failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// The server answered with a non-success status
    #[error("server responded with {status}: {body}")]
    Status { status: u16, body: String },

    /// JSON encoding error
    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Http(err.to_string())
    }
}

impl From<ClientError> for StagingError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Status { status, body } => StagingError::Transmission {
                status: Some(status),
                message: body,
            },
            ClientError::InvalidConfig(msg) => StagingError::Config(msg),
            ClientError::Json(e) => StagingError::Serialization(e),
            other => StagingError::Transmission {
                status: None,
                message: other.to_string(),
            },
        }
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_maps_to_retryable_transmission() {
        let err: StagingError = ClientError::Status {
            status: 401,
            body: "bad credentials".into(),
        }
        .into();
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "server responded with 401: bad credentials");
    }

    #[test]
    fn network_failure_has_no_status() {
        let err: StagingError = ClientError::Http("connection refused".into()).into();
        assert!(matches!(err, StagingError::Transmission { status: None, .. }));
    }
}
