//! # Couchmap Store
//!
//! Document model and store API for couchmap.
//!
//! This crate provides:
//! - The [`Document`] envelope: id, type discriminator, revision, JSON fields
//! - The [`DocumentStore`] trait: async CRUD, bulk update, and query
//!   operations over a revisioned JSON document store
//! - [`BulkBatch`] for recording create/update/delete entries
//! - [`MemoryStore`], an in-memory store with CouchDB-style revision
//!   semantics, for tests and ephemeral use
//! - [`RecordingStore`], a wrapping store that records operation order
//!
//! ## Revisions
//!
//! Every accepted mutation yields a fresh, opaque revision token. Updates and
//! deletes must present the current token; a stale token is a conflict. This
//! is the store's only concurrency mechanism - there are no transactions.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod bulk;
mod document;
mod error;
mod memory;
mod query;
mod recording;

pub use backend::DocumentStore;
pub use bulk::{BulkBatch, BulkEntry, DocumentHead};
pub use document::{Document, DocumentId, Revision, DOC_TYPE_MEMBER, ID_MEMBER, REVISION_MEMBER};
pub use error::{DocumentParseError, StoreError, StoreResult};
pub use memory::{MemoryStore, ViewFn};
pub use query::{FullTextQuery, FullTextResult, FullTextRow, ViewQuery, ViewResult, ViewRow};
pub use recording::{RecordingStore, StoreOp};
