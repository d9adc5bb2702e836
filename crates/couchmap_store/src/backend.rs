//! Document store trait definition.

use crate::bulk::{BulkBatch, DocumentHead};
use crate::document::{Document, DocumentId, Revision};
use crate::error::StoreResult;
use crate::query::{FullTextQuery, FullTextResult, ViewQuery, ViewResult};
use async_trait::async_trait;
use std::collections::HashMap;

/// A remote JSON document store.
///
/// Stores hold documents keyed by string id, guarded by optimistic revision
/// tokens. The store assigns a fresh revision on every accepted mutation; a
/// mutation carrying a stale revision fails with a conflict.
///
/// # Invariants
///
/// - `save_document` fails if a document with that id already exists
/// - `update_document` and `delete_document` fail with a conflict when the
///   supplied revision is not current
/// - `get_document` returns `None` for a missing document, never an error
/// - `bulk_update` reports a head for exactly the entries it accepted;
///   rejected entries are absent from the result map
/// - No operation is retried internally; retry policy belongs to transports
///   or callers
///
/// # Implementors
///
/// - [`super::MemoryStore`] - in-memory store for tests and ephemeral use
/// - [`super::RecordingStore`] - wrapping store for call-order verification
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persists a new document.
    ///
    /// # Errors
    ///
    /// Fails with `AlreadyExists` if a document with that id exists.
    async fn save_document(&self, document: &Document) -> StoreResult<DocumentHead>;

    /// Updates an existing document.
    ///
    /// The document must carry its current revision.
    ///
    /// # Errors
    ///
    /// Fails with `Conflict` if the revision is stale, `NotFound` if the
    /// document does not exist.
    async fn update_document(&self, document: &Document) -> StoreResult<DocumentHead>;

    /// Deletes a document at the given revision.
    ///
    /// # Errors
    ///
    /// Fails with `Conflict` if the revision is stale, `NotFound` if the
    /// document does not exist.
    async fn delete_document(
        &self,
        id: &DocumentId,
        revision: &Revision,
    ) -> StoreResult<DocumentHead>;

    /// Fetches a document by id.
    ///
    /// Returns `None` if no document with that id exists.
    async fn get_document(&self, id: &DocumentId) -> StoreResult<Option<Document>>;

    /// Applies a batch of mutations in one round trip.
    ///
    /// Returns a head for each entry the store accepted. Entries the store
    /// rejected (stale revision, existing id) are absent from the map; the
    /// caller decides what to do about them.
    async fn bulk_update(
        &self,
        batch: BulkBatch,
    ) -> StoreResult<HashMap<DocumentId, DocumentHead>>;

    /// Runs a map-view query.
    async fn query_view(&self, query: &ViewQuery) -> StoreResult<ViewResult>;

    /// Runs a full-text query.
    async fn query_fulltext(&self, query: &FullTextQuery) -> StoreResult<FullTextResult>;
}
