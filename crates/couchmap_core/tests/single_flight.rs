//! Integration tests for the single-flight flush discipline.

use async_trait::async_trait;
use couchmap_core::{shared, EntityConfig, Mapping, SessionFactory, Shared};
use couchmap_store::{
    BulkBatch, BulkEntry, Document, DocumentHead, DocumentId, DocumentStore, FullTextQuery,
    FullTextResult, MemoryStore, RecordingStore, Revision, StoreOp, StoreResult, ViewQuery,
    ViewResult,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    revision: Option<Revision>,
    name: String,
    age: u32,
}

fn user(id: &str, name: &str, age: u32) -> Shared<User> {
    shared(User {
        id: id.to_string(),
        revision: None,
        name: name.to_string(),
        age,
    })
}

fn mapping() -> Arc<Mapping> {
    let mapping = Mapping::builder()
        .entity(
            EntityConfig::new(
                "user",
                |u: &User| u.id.clone(),
                |u: &mut User, id| u.id = id,
            )
            .revision(|u: &User| u.revision.clone(), |u, rev| {
                u.revision = Some(rev)
            }),
        )
        .build()
        .unwrap();
    Arc::new(mapping)
}

fn recording_factory(
    delay_bulk: Option<Duration>,
) -> (Arc<RecordingStore<MemoryStore>>, SessionFactory) {
    let mut store = RecordingStore::new(
        MemoryStore::new().with_view("users", "by_name", |doc| {
            doc.field("name")
                .map(|name| vec![(name.clone(), serde_json::Value::Null)])
                .unwrap_or_default()
        }),
    );
    if let Some(delay) = delay_bulk {
        store = store.with_delay(StoreOp::BulkUpdate, delay);
    }
    let store = Arc::new(store);
    let factory = SessionFactory::new(Arc::clone(&store) as Arc<dyn DocumentStore>, mapping());
    (store, factory)
}

#[tokio::test]
async fn concurrent_flushes_run_sequentially() {
    let (store, factory) = recording_factory(Some(Duration::from_millis(25)));
    let session = factory.open_session();

    let alice = user("1", "Alice", 30);
    session.save(&alice).await.unwrap();
    alice.write().age = 31;

    let (first, second) = tokio::join!(session.save_changes(), session.save_changes());
    first.unwrap();
    second.unwrap();

    // Exactly two bulk calls, never overlapping.
    assert_eq!(store.count(StoreOp::BulkUpdate), 2);
    assert_eq!(store.max_concurrency(), 1);
}

#[tokio::test]
async fn second_flush_captures_mutation_made_during_first() {
    let (store, factory) = recording_factory(Some(Duration::from_millis(25)));
    let session = factory.open_session();

    let alice = user("1", "Alice", 30);
    session.save(&alice).await.unwrap();
    alice.write().age = 31;

    let (first, second) = tokio::join!(session.save_changes(), async {
        // Let the first flush acquire the session and reach the store.
        tokio::time::sleep(Duration::from_millis(5)).await;
        alice.write().age = 32;
        session.save_changes().await
    });

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.submitted, 1);
    // The second flush computed a fresh dirty set: the mutation made after
    // the first flush started was not lost.
    assert_eq!(second.submitted, 1);
    assert_eq!(second.saved, vec![DocumentId::new("user.1")]);

    let committed = store
        .inner()
        .get_document(&"user.1".into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(committed.field("age"), Some(&serde_json::json!(32)));
    assert_eq!(committed.revision(), alice.read().revision.as_ref());
}

#[tokio::test]
async fn query_waits_for_outstanding_flush() {
    let (store, factory) = recording_factory(Some(Duration::from_millis(25)));
    let session = factory.open_session();

    let alice = user("1", "Alice", 30);
    session.save(&alice).await.unwrap();
    alice.write().age = 31;

    let query = ViewQuery::new("users", "by_name");
    let (flush, queried) = tokio::join!(
        session.save_changes(),
        session.query_values::<serde_json::Value>(&query),
    );
    flush.unwrap();
    queried.unwrap();

    let operations = store.operations();
    let bulk_at = operations
        .iter()
        .position(|op| *op == StoreOp::BulkUpdate)
        .unwrap();
    let query_at = operations
        .iter()
        .position(|op| *op == StoreOp::QueryView)
        .unwrap();
    assert!(
        bulk_at < query_at,
        "query reached the store before the flush: {operations:?}"
    );
    assert_eq!(store.max_concurrency(), 1);
}

#[tokio::test]
async fn load_waits_for_outstanding_flush() {
    let (store, factory) = recording_factory(Some(Duration::from_millis(25)));
    let session = factory.open_session();

    let alice = user("1", "Alice", 30);
    session.save(&alice).await.unwrap();
    alice.write().age = 31;

    let (flush, loaded) = tokio::join!(session.save_changes(), session.load::<User>("2"));
    flush.unwrap();
    assert!(loaded.unwrap().is_none());

    let operations = store.operations();
    assert_eq!(
        operations,
        [StoreOp::Save, StoreOp::BulkUpdate, StoreOp::Get],
        "load overtook the flush"
    );
}

#[tokio::test]
async fn empty_dirty_set_still_issues_the_bulk_call() {
    let (store, factory) = recording_factory(None);
    let session = factory.open_session();

    let report = session.save_changes().await.unwrap();
    assert_eq!(report.submitted, 0);
    assert!(report.saved.is_empty());
    assert_eq!(store.count(StoreOp::BulkUpdate), 1);
}

/// A store whose bulk update silently drops entries for one document id,
/// standing in for a store-side partial failure.
struct PartialBulkStore {
    inner: MemoryStore,
    drop_id: DocumentId,
    dropping: Mutex<bool>,
}

impl PartialBulkStore {
    fn new(inner: MemoryStore, drop_id: DocumentId) -> Self {
        Self {
            inner,
            drop_id,
            dropping: Mutex::new(true),
        }
    }
}

#[async_trait]
impl DocumentStore for PartialBulkStore {
    async fn save_document(&self, document: &Document) -> StoreResult<DocumentHead> {
        self.inner.save_document(document).await
    }

    async fn update_document(&self, document: &Document) -> StoreResult<DocumentHead> {
        self.inner.update_document(document).await
    }

    async fn delete_document(
        &self,
        id: &DocumentId,
        revision: &Revision,
    ) -> StoreResult<DocumentHead> {
        self.inner.delete_document(id, revision).await
    }

    async fn get_document(&self, id: &DocumentId) -> StoreResult<Option<Document>> {
        self.inner.get_document(id).await
    }

    async fn bulk_update(
        &self,
        batch: BulkBatch,
    ) -> StoreResult<HashMap<DocumentId, DocumentHead>> {
        let batch = if *self.dropping.lock() {
            *self.dropping.lock() = false;
            let mut kept = BulkBatch::new();
            for entry in batch.into_entries() {
                if *entry.document_id() == self.drop_id {
                    continue;
                }
                match entry {
                    BulkEntry::Create { document } => {
                        kept.create(document);
                    }
                    BulkEntry::Update { document } => {
                        kept.update(document);
                    }
                    BulkEntry::Delete { id, revision } => {
                        kept.delete(id, revision);
                    }
                }
            }
            kept
        } else {
            batch
        };
        self.inner.bulk_update(batch).await
    }

    async fn query_view(&self, query: &ViewQuery) -> StoreResult<ViewResult> {
        self.inner.query_view(query).await
    }

    async fn query_fulltext(&self, query: &FullTextQuery) -> StoreResult<FullTextResult> {
        self.inner.query_fulltext(query).await
    }
}

#[tokio::test]
async fn unacknowledged_entries_stay_dirty_and_resubmit() {
    let store = Arc::new(PartialBulkStore::new(
        MemoryStore::new(),
        DocumentId::new("user.1"),
    ));
    let factory = SessionFactory::new(Arc::clone(&store) as Arc<dyn DocumentStore>, mapping());
    let session = factory.open_session();

    let alice = user("1", "Alice", 30);
    let bob = user("2", "Bob", 25);
    session.save(&alice).await.unwrap();
    session.save(&bob).await.unwrap();
    alice.write().age = 31;
    bob.write().age = 26;

    let report = session.save_changes().await.unwrap();
    assert_eq!(report.submitted, 2);
    assert_eq!(report.saved, vec![DocumentId::new("user.2")]);
    assert_eq!(report.unacknowledged, vec![DocumentId::new("user.1")]);
    // No revision was applied for the dropped entry.
    assert_eq!(alice.read().revision.clone().unwrap().generation(), Some(1));

    // The entry stayed dirty; the next flush resubmits exactly it.
    let retry = session.save_changes().await.unwrap();
    assert_eq!(retry.submitted, 1);
    assert_eq!(retry.saved, vec![DocumentId::new("user.1")]);
    assert!(retry.unacknowledged.is_empty());
    assert_eq!(alice.read().revision.clone().unwrap().generation(), Some(2));

    let committed = store
        .get_document(&"user.1".into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(committed.field("age"), Some(&serde_json::json!(31)));
}
