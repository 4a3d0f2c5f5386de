//! Error types for the Penglish voice orchestrator

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Top-level error for setup and protocol-level failures.
///
/// Turn-level failures are not represented here: they are `TurnFailure`
/// values and always end up as a spoken apology.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Malformed(#[from] MalformedEvent),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

/// Session store contract violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Duplicate session for call {0}")]
    DuplicateSession(String),

    #[error("Unknown session for call {0}")]
    UnknownSession(String),
}

/// A provider webhook payload that lacks a required field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed {kind} event: missing {field}")]
pub struct MalformedEvent {
    pub kind: &'static str,
    pub field: &'static str,
}

impl MalformedEvent {
    pub fn missing(kind: &'static str, field: &'static str) -> Self {
        Self { kind, field }
    }
}

/// Failures reported by an external collaborator (recording host, STT, chat, signaling).
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} API error {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Unexpected {service} response: {detail}")]
    Decode {
        service: &'static str,
        detail: String,
    },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Archive write failures.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Call {0} is already archived")]
    AlreadyArchived(String),

    #[error("Archive serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Archive IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive sled error: {0}")]
    Sled(#[from] sled::Error),
}

/// Why an outbound call could not be placed.
#[derive(Error, Debug)]
pub enum PlaceCallError {
    #[error("to_number is required")]
    MissingNumber,

    #[error("Outbound calling is not configured")]
    NotConfigured,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
