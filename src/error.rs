//! Error types for the calluna client.

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, CallunaError>;

/// Errors surfaced by the client.
#[derive(Error, Debug)]
pub enum CallunaError {
    /// The addressed document does not exist.
    #[error("document '{id}' not found")]
    NotFound { id: String },

    /// A conditional write lost against a concurrent writer, or a create
    /// hit an already existing document.
    #[error("version conflict on document '{id}': {reason}")]
    VersionConflict { id: String, reason: String },

    /// The optimistic update retry budget was spent while conflicts
    /// persisted. Carries the total number of attempts made.
    #[error("update of document '{id}' still conflicting after {attempts} attempts")]
    ConcurrencyExhausted { id: String, attempts: u32 },

    /// Network or protocol level failure talking to the engine.
    #[error("transport error: {0}")]
    Transport(String),

    /// Encoding or decoding a domain object failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Any other error reported by the engine.
    #[error("engine error (status {status}, {kind}): {reason}")]
    Engine {
        status: u16,
        kind: String,
        reason: String,
    },

    /// Client-side misuse caught before any request was issued.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal client failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CallunaError {
    /// Create a not found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a version conflict error.
    pub fn version_conflict(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::VersionConflict {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a codec error.
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Create an engine error.
    pub fn engine(status: u16, kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Engine {
            status,
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is a version conflict.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// Whether this error is a missing document.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for CallunaError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for CallunaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
