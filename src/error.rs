//! Error kinds shared by the track model, the matcher and the sync client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrailError {
    /// Malformed reference trace
    #[error("failed to parse trace: {0}")]
    Parse(String),

    /// Reference trace without a single trail point
    #[error("reference track has no points")]
    EmptyTrack,

    /// Decrypt or integrity failure on shared content
    #[error("cannot decode shared content: {0}")]
    Decode(String),

    /// Transport, HTTP status or CORS relay failure
    #[error("network error: {0}")]
    Network(String),

    /// Device denied the position request or timed out
    #[error("location unavailable: {0}")]
    Location(String),

    /// Malformed import parameters
    #[error("invalid parameter: {0}")]
    Validation(String),

    /// Local state file could not be read or written
    #[error("storage error: {0}")]
    Storage(String),
}

impl TrailError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<reqwest::Error> for TrailError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TrailError::Network("request timed out".to_string())
        } else {
            TrailError::Network(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, TrailError>;
