//! Error types for store operations.

use crate::document::DocumentId;
use serde_json::Value;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur when talking to a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A document with this id already exists.
    #[error("document already exists: {id}")]
    AlreadyExists {
        /// The conflicting document id.
        id: DocumentId,
    },

    /// The supplied revision is stale or missing.
    #[error("revision conflict on document {id}")]
    Conflict {
        /// The document whose revision did not match.
        id: DocumentId,
    },

    /// The document does not exist.
    #[error("document not found: {id}")]
    NotFound {
        /// The document id that was not found.
        id: DocumentId,
    },

    /// Network or transport failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A request the store cannot serve (unknown view, malformed query).
    #[error("invalid request: {message}")]
    Invalid {
        /// Description of the problem.
        message: String,
    },

    /// An inbound document could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] DocumentParseError),
}

impl StoreError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an invalid request error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Returns true if retrying the operation could succeed.
    ///
    /// Advisory only: the store client never retries internally.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transport { retryable: true, .. })
    }
}

/// Parse failure for an inbound document.
///
/// Carries the offending document text for diagnostics.
#[derive(Debug, Error)]
#[error("document parse error: {message}")]
pub struct DocumentParseError {
    /// What was missing or malformed.
    pub message: String,
    /// The offending document, rendered as JSON text.
    pub document: String,
}

impl DocumentParseError {
    /// Creates a parse error from a message and the offending JSON value.
    pub fn new(message: impl Into<String>, document: &Value) -> Self {
        Self {
            message: message.into(),
            document: document.to_string(),
        }
    }

    /// Creates a parse error from a message and pre-rendered document text.
    pub fn with_text(message: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            document: document.into(),
        }
    }
}
