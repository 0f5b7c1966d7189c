#![forbid(unsafe_code)]

// Orchestration errors surfaced to signaling peers and HTTP callers

use crate::media::MediaError;
use thiserror::Error;

/// Error returned by every request/response orchestration operation.
///
/// Each variant maps to a distinct numeric code so a remote caller can tell
/// the kinds apart without parsing the reason string.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    State(String),

    #[error("{0}")]
    UnsupportedOperation(String),

    #[error("media engine error: {0}")]
    Engine(#[from] MediaError),
}

impl OrchestrationError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        Self::NotFound(format!("{what} with id \"{id}\" not found"))
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation(message.into())
    }

    /// Code carried in signaling rejections and used as the HTTP status.
    pub fn code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::UnsupportedOperation(_) => 405,
            Self::AlreadyExists(_) => 409,
            Self::State(_) => 412,
            Self::Engine(_) => 500,
        }
    }
}

impl From<serde_json::Error> for OrchestrationError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation(format!("malformed request data: {e}"))
    }
}

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;
