//! Error types for deckhand.

use std::path::PathBuf;
use thiserror::Error;

use crate::kms::KmsError;

/// Result type alias using deckhand's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the vault, the embedding engine and the materializer.
///
/// Every variant is terminal: nothing in this crate retries or downgrades
/// a failure. Messages carry their underlying cause inline, so the CLI can
/// print the top-level message alone.
#[derive(Error, Debug)]
pub enum Error {
    /// Explicit decrypt requested on content without a non-empty `cipher` field
    #[error("{}: file is not encrypted (no non-empty `cipher` field)", .path.display())]
    NotEncrypted { path: PathBuf },

    /// Content looked like an envelope but failed strict parsing
    #[error("Envelope is corrupt: {reason}")]
    EnvelopeCorrupt { reason: String },

    /// The key-management service rejected or failed the call
    #[error("Key management call failed for key '{key_id}': {cause}")]
    KeyManagement { key_id: String, cause: KmsError },

    /// A fragment could not be spliced into the working document
    #[error("Failed to embed {what}: {reason}")]
    Embed { what: String, reason: String },

    /// Embed points left in the merged document
    #[error("Unresolved placeholders in merged document: {}", .0.join(", "))]
    UnresolvedPlaceholders(Vec<String>),

    /// Merged document does not match the settings shape
    #[error("Merged document is not valid deployment settings: {0}")]
    Parse(serde_json::Error),

    /// Envelope could not be serialized
    #[error("Failed to serialize envelope: {0}")]
    Serialization(serde_json::Error),

    #[error("I/O error on {}: {cause}", .path.display())]
    Io {
        path: PathBuf,
        cause: std::io::Error,
    },

    /// Another error, annotated with the file it concerns
    #[error("{}: {inner}", .path.display())]
    InFile { path: PathBuf, inner: Box<Error> },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, cause: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            cause,
        }
    }

    pub(crate) fn embed(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Embed {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// Attach a file path, unless the error already names one.
    pub(crate) fn in_file(self, path: impl Into<PathBuf>) -> Self {
        match self {
            Self::NotEncrypted { .. } | Self::Io { .. } | Self::InFile { .. } => self,
            other => Self::InFile {
                path: path.into(),
                inner: Box::new(other),
            },
        }
    }

    /// Strip `InFile` wrappers and return the underlying error.
    pub fn root(&self) -> &Error {
        match self {
            Self::InFile { inner, .. } => inner.root(),
            other => other,
        }
    }
}
