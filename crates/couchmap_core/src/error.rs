//! Error types for the session engine.

use couchmap_store::{DocumentId, DocumentParseError, StoreError};
use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised while building a [`Mapping`](crate::Mapping).
#[derive(Debug, Error)]
pub enum MappingError {
    /// An entity type was registered more than once.
    #[error("duplicate registration for entity type {entity_type}")]
    DuplicateRegistration {
        /// Name of the entity type registered twice.
        entity_type: &'static str,
    },
}

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The entity type has no registered configuration.
    #[error("entity type not registered: {entity_type}")]
    NotRegistered {
        /// Name of the unregistered entity type.
        entity_type: &'static str,
    },

    /// The entity's identifier member is empty and no generator is
    /// configured.
    #[error("entity of type {entity_type} has no identifier")]
    MissingId {
        /// Name of the entity type.
        entity_type: &'static str,
    },

    /// The entity, or another entity with the same document id, is already
    /// tracked by this session.
    #[error("document already tracked: {document_id}")]
    AlreadyTracked {
        /// The document id already present in the cache.
        document_id: DocumentId,
    },

    /// The entity already carries a revision. A persisted entity must be
    /// loaded, mutated, and flushed - not saved again.
    #[error("document {document_id} was already persisted; save changes instead of saving again")]
    AlreadyPersisted {
        /// The document id of the already-persisted entity.
        document_id: DocumentId,
    },

    /// No revision is known for the entity, neither from the cache nor from
    /// its own revision member. The store's optimistic-concurrency
    /// precondition cannot be satisfied.
    #[error("cannot delete document {document_id} without a known revision")]
    MissingRevision {
        /// The document id that cannot be deleted.
        document_id: DocumentId,
    },

    /// A cached wrapper's entity type is incompatible with the statically
    /// requested type. Always a programming error in the caller.
    #[error("type mismatch for document {document_id}: requested {requested}, tracked {actual}")]
    TypeMismatch {
        /// The document id in question.
        document_id: DocumentId,
        /// The type the caller requested.
        requested: &'static str,
        /// The type the cache is tracking.
        actual: &'static str,
    },

    /// A query that cannot produce what it asks for, rejected before any
    /// store call.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },

    /// Entity (de)serialization failure.
    #[error("mapping error: {message}")]
    Mapping {
        /// Description of the failure.
        message: String,
    },

    /// An inbound document could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] DocumentParseError),

    /// Store failure, propagated as-is.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Two or more independent failures in one operation.
    ///
    /// A single failure is always surfaced as itself (see
    /// [`SessionError::aggregate`]), so sync and async callers can match on
    /// the original error type either way.
    #[error("{} failures in one operation", .0.len())]
    Multiple(Vec<SessionError>),
}

impl SessionError {
    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates a mapping error.
    pub fn mapping(message: impl std::fmt::Display) -> Self {
        Self::Mapping {
            message: message.to_string(),
        }
    }

    /// Collapses a non-empty list of failures: a single failure is returned
    /// as itself, several become [`SessionError::Multiple`].
    #[must_use]
    pub fn aggregate(mut failures: Vec<SessionError>) -> Self {
        debug_assert!(!failures.is_empty());
        if failures.len() == 1 {
            failures.remove(0)
        } else {
            Self::Multiple(failures)
        }
    }
}
