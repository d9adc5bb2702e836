//! A wrapping store that records operation order, for concurrency tests.

use crate::backend::DocumentStore;
use crate::bulk::{BulkBatch, DocumentHead};
use crate::document::{Document, DocumentId, Revision};
use crate::error::StoreResult;
use crate::query::{FullTextQuery, FullTextResult, ViewQuery, ViewResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Store operations observable in a [`RecordingStore`] log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `save_document`
    Save,
    /// `update_document`
    Update,
    /// `delete_document`
    Delete,
    /// `get_document`
    Get,
    /// `bulk_update`
    BulkUpdate,
    /// `query_view`
    QueryView,
    /// `query_fulltext`
    QueryFullText,
}

/// A store decorator that records the order of operations.
///
/// Every call appends its [`StoreOp`] to a shared log before delegating.
/// Individual operations can be slowed down with [`with_delay`] to widen race
/// windows, and [`max_concurrency`] reports how many operations ever ran at
/// the same time — `1` proves the caller serialized its store calls.
///
/// [`with_delay`]: RecordingStore::with_delay
/// [`max_concurrency`]: RecordingStore::max_concurrency
pub struct RecordingStore<S> {
    inner: S,
    log: Mutex<Vec<StoreOp>>,
    delays: HashMap<StoreOp, Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl<S> RecordingStore<S> {
    /// Wraps a store.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
            delays: HashMap::new(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Delays every call of the given operation before it reaches the
    /// wrapped store.
    #[must_use]
    pub fn with_delay(mut self, op: StoreOp, delay: Duration) -> Self {
        self.delays.insert(op, delay);
        self
    }

    /// Returns the operations recorded so far, in call order.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.log.lock().clone()
    }

    /// Returns how often the given operation was called.
    #[must_use]
    pub fn count(&self, op: StoreOp) -> usize {
        self.log.lock().iter().filter(|o| **o == op).count()
    }

    /// Returns the highest number of operations that were ever in flight
    /// at the same time.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn enter(&self, op: StoreOp) -> OpGuard<'_> {
        self.log.lock().push(op);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&op) {
            tokio::time::sleep(*delay).await;
        }
        OpGuard {
            active: &self.active,
        }
    }
}

/// Decrements the in-flight counter when an operation completes.
struct OpGuard<'a> {
    active: &'a AtomicUsize,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<S: fmt::Debug> fmt::Debug for RecordingStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingStore")
            .field("inner", &self.inner)
            .field("operations", &self.log.lock().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for RecordingStore<S> {
    async fn save_document(&self, document: &Document) -> StoreResult<DocumentHead> {
        let _guard = self.enter(StoreOp::Save).await;
        self.inner.save_document(document).await
    }

    async fn update_document(&self, document: &Document) -> StoreResult<DocumentHead> {
        let _guard = self.enter(StoreOp::Update).await;
        self.inner.update_document(document).await
    }

    async fn delete_document(
        &self,
        id: &DocumentId,
        revision: &Revision,
    ) -> StoreResult<DocumentHead> {
        let _guard = self.enter(StoreOp::Delete).await;
        self.inner.delete_document(id, revision).await
    }

    async fn get_document(&self, id: &DocumentId) -> StoreResult<Option<Document>> {
        let _guard = self.enter(StoreOp::Get).await;
        self.inner.get_document(id).await
    }

    async fn bulk_update(
        &self,
        batch: BulkBatch,
    ) -> StoreResult<HashMap<DocumentId, DocumentHead>> {
        let _guard = self.enter(StoreOp::BulkUpdate).await;
        self.inner.bulk_update(batch).await
    }

    async fn query_view(&self, query: &ViewQuery) -> StoreResult<ViewResult> {
        let _guard = self.enter(StoreOp::QueryView).await;
        self.inner.query_view(query).await
    }

    async fn query_fulltext(&self, query: &FullTextQuery) -> StoreResult<FullTextResult> {
        let _guard = self.enter(StoreOp::QueryFullText).await;
        self.inner.query_fulltext(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde_json::Map;

    fn doc(id: &str) -> Document {
        Document::new(DocumentId::new(id), "user", Map::new())
    }

    #[tokio::test]
    async fn records_call_order() {
        let store = RecordingStore::new(MemoryStore::new());

        store.save_document(&doc("user.1")).await.unwrap();
        store.get_document(&DocumentId::new("user.1")).await.unwrap();
        store.bulk_update(BulkBatch::new()).await.unwrap();

        assert_eq!(
            store.operations(),
            [StoreOp::Save, StoreOp::Get, StoreOp::BulkUpdate]
        );
        assert_eq!(store.count(StoreOp::Get), 1);
    }

    #[tokio::test]
    async fn sequential_calls_never_overlap() {
        let store = RecordingStore::new(MemoryStore::new());

        store.save_document(&doc("user.1")).await.unwrap();
        store.save_document(&doc("user.2")).await.unwrap();

        assert_eq!(store.max_concurrency(), 1);
    }

    #[tokio::test]
    async fn delay_applies_before_delegation() {
        let store =
            RecordingStore::new(MemoryStore::new()).with_delay(StoreOp::Get, Duration::from_millis(10));

        let started = std::time::Instant::now();
        store.get_document(&DocumentId::new("user.1")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(10));
    }
}
