//! In-memory document store for testing.

use crate::backend::DocumentStore;
use crate::bulk::{BulkBatch, BulkEntry, DocumentHead};
use crate::document::{Document, DocumentId, Revision};
use crate::error::{StoreError, StoreResult};
use crate::query::{FullTextQuery, FullTextResult, FullTextRow, ViewQuery, ViewResult, ViewRow};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

/// A map function projecting a document into zero or more `(key, value)` rows.
pub type ViewFn = Box<dyn Fn(&Document) -> Vec<(Value, Value)> + Send + Sync>;

/// A stored document: revisioned fields plus the type discriminator.
struct StoredDocument {
    doc_type: String,
    revision: Revision,
    fields: Map<String, Value>,
}

impl StoredDocument {
    fn to_document(&self, id: &DocumentId) -> Document {
        Document::new(id.clone(), self.doc_type.clone(), self.fields.clone())
            .with_revision(self.revision.clone())
    }
}

/// An in-memory document store.
///
/// Implements the full [`DocumentStore`] contract with CouchDB-style
/// semantics: revisions are `{generation}-{hex}` tokens advancing on every
/// update, stale revisions conflict, and bulk updates report heads only for
/// accepted entries.
///
/// Map views are registered at construction time with [`with_view`] and
/// evaluated over all documents on demand. Full-text queries do a
/// case-insensitive substring scan over string fields.
///
/// Suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral sessions that don't need a remote store
///
/// [`with_view`]: MemoryStore::with_view
///
/// # Example
///
/// ```rust,ignore
/// let store = MemoryStore::new().with_view("users", "by_name", |doc| {
///     doc.field("name")
///         .map(|name| vec![(name.clone(), Value::Null)])
///         .unwrap_or_default()
/// });
/// ```
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<DocumentId, StoredDocument>>,
    views: HashMap<String, ViewFn>,
}

impl MemoryStore {
    /// Creates an empty store with no views.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a map view under `design/view`.
    #[must_use]
    pub fn with_view<F>(mut self, design: &str, view: &str, map: F) -> Self
    where
        F: Fn(&Document) -> Vec<(Value, Value)> + Send + Sync + 'static,
    {
        self.views.insert(format!("{design}/{view}"), Box::new(map));
        self
    }

    /// Returns the number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns true if no documents are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Returns true if a document with this id is stored.
    #[must_use]
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.documents.read().contains_key(id)
    }

    fn apply_create(
        documents: &mut HashMap<DocumentId, StoredDocument>,
        document: &Document,
    ) -> StoreResult<DocumentHead> {
        let id = document.id().clone();
        if documents.contains_key(&id) {
            return Err(StoreError::AlreadyExists { id });
        }
        let revision = next_revision(1, document.fields())?;
        documents.insert(
            id.clone(),
            StoredDocument {
                doc_type: document.doc_type().to_string(),
                revision: revision.clone(),
                fields: document.fields().clone(),
            },
        );
        Ok(DocumentHead::new(id, revision))
    }

    fn apply_update(
        documents: &mut HashMap<DocumentId, StoredDocument>,
        document: &Document,
    ) -> StoreResult<DocumentHead> {
        let id = document.id().clone();
        let Some(stored) = documents.get_mut(&id) else {
            return Err(StoreError::NotFound { id });
        };
        match document.revision() {
            Some(revision) if *revision == stored.revision => {}
            _ => return Err(StoreError::Conflict { id }),
        }
        let generation = stored.revision.generation().unwrap_or(0) + 1;
        let revision = next_revision(generation, document.fields())?;
        stored.doc_type = document.doc_type().to_string();
        stored.revision = revision.clone();
        stored.fields = document.fields().clone();
        Ok(DocumentHead::new(id, revision))
    }

    fn apply_delete(
        documents: &mut HashMap<DocumentId, StoredDocument>,
        id: &DocumentId,
        revision: &Revision,
    ) -> StoreResult<DocumentHead> {
        let Some(stored) = documents.get(id) else {
            return Err(StoreError::NotFound { id: id.clone() });
        };
        if stored.revision != *revision {
            return Err(StoreError::Conflict { id: id.clone() });
        }
        let generation = stored.revision.generation().unwrap_or(0) + 1;
        let tombstone = next_revision(generation, &Map::new())?;
        documents.remove(id);
        Ok(DocumentHead::new(id.clone(), tombstone))
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("documents", &self.len())
            .field("views", &self.views.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn save_document(&self, document: &Document) -> StoreResult<DocumentHead> {
        let mut documents = self.documents.write();
        Self::apply_create(&mut documents, document)
    }

    async fn update_document(&self, document: &Document) -> StoreResult<DocumentHead> {
        let mut documents = self.documents.write();
        Self::apply_update(&mut documents, document)
    }

    async fn delete_document(
        &self,
        id: &DocumentId,
        revision: &Revision,
    ) -> StoreResult<DocumentHead> {
        let mut documents = self.documents.write();
        Self::apply_delete(&mut documents, id, revision)
    }

    async fn get_document(&self, id: &DocumentId) -> StoreResult<Option<Document>> {
        let documents = self.documents.read();
        Ok(documents.get(id).map(|stored| stored.to_document(id)))
    }

    async fn bulk_update(
        &self,
        batch: BulkBatch,
    ) -> StoreResult<HashMap<DocumentId, DocumentHead>> {
        let mut documents = self.documents.write();
        let mut heads = HashMap::new();
        for entry in batch.into_entries() {
            let result = match &entry {
                BulkEntry::Create { document } => Self::apply_create(&mut documents, document),
                BulkEntry::Update { document } => Self::apply_update(&mut documents, document),
                BulkEntry::Delete { id, revision } => {
                    Self::apply_delete(&mut documents, id, revision)
                }
            };
            // Rejected entries stay out of the result map.
            if let Ok(head) = result {
                heads.insert(head.id.clone(), head);
            }
        }
        Ok(heads)
    }

    async fn query_view(&self, query: &ViewQuery) -> StoreResult<ViewResult> {
        let name = format!("{}/{}", query.design, query.view);
        let Some(map) = self.views.get(&name) else {
            return Err(StoreError::invalid(format!("no such view: {name}")));
        };

        let documents = self.documents.read();
        let mut rows = Vec::new();
        for (id, stored) in documents.iter() {
            let doc = stored.to_document(id);
            for (key, value) in map(&doc) {
                if !key_matches(query, &key) {
                    continue;
                }
                rows.push(ViewRow {
                    key,
                    value,
                    id: Some(id.clone()),
                    doc: query.include_docs.then(|| doc.clone()),
                });
            }
        }
        drop(documents);

        rows.sort_by(|a, b| {
            cmp_values(&a.key, &b.key).then_with(|| a.id.cmp(&b.id))
        });
        if query.descending {
            rows.reverse();
        }

        let total_rows = rows.len() as u64;
        let offset = query.skip.min(total_rows);
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        let rows = rows
            .into_iter()
            .skip(query.skip as usize)
            .take(limit)
            .collect();

        Ok(ViewResult {
            rows,
            total_rows,
            offset,
        })
    }

    async fn query_fulltext(&self, query: &FullTextQuery) -> StoreResult<FullTextResult> {
        let needle = query.query.to_lowercase();
        let documents = self.documents.read();
        let mut rows = Vec::new();
        if !needle.is_empty() {
            for (id, stored) in documents.iter() {
                let score = stored
                    .fields
                    .values()
                    .map(|value| match_count(value, &needle))
                    .sum::<usize>();
                if score > 0 {
                    rows.push(FullTextRow {
                        fields: stored.fields.clone(),
                        score: score as f32,
                        id: Some(id.clone()),
                        doc: query.include_docs.then(|| stored.to_document(id)),
                    });
                }
            }
        }
        drop(documents);

        rows.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let total_rows = rows.len() as u64;
        let offset = query.skip.min(total_rows);
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        let rows = rows
            .into_iter()
            .skip(query.skip as usize)
            .take(limit)
            .collect();

        Ok(FullTextResult {
            rows,
            total_rows,
            offset,
        })
    }
}

/// Computes the next revision token for a document body.
///
/// The suffix is a truncated content hash, so the token is deterministic for
/// a given generation and body.
fn next_revision(generation: u64, fields: &Map<String, Value>) -> StoreResult<Revision> {
    let body = serde_json::to_vec(fields)
        .map_err(|e| StoreError::invalid(format!("unserializable document body: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(generation.to_be_bytes());
    hasher.update(&body);
    let digest = hasher.finalize();
    let mut suffix = String::with_capacity(16);
    for byte in &digest[..8] {
        let _ = write!(suffix, "{byte:02x}");
    }
    Ok(Revision::new(format!("{generation}-{suffix}")))
}

/// Checks a row key against the query's key filters.
fn key_matches(query: &ViewQuery, key: &Value) -> bool {
    if let Some(exact) = &query.key {
        return cmp_values(key, exact) == Ordering::Equal;
    }
    if let Some(start) = &query.start_key {
        if cmp_values(key, start) == Ordering::Less {
            return false;
        }
    }
    if let Some(end) = &query.end_key {
        if cmp_values(key, end) == Ordering::Greater {
            return false;
        }
    }
    true
}

/// Total order over JSON values: null < bool < number < string < array < object.
fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let ord = cmp_values(xi, yi);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Counts string values containing the (lowercased) needle.
fn match_count(value: &Value, needle: &str) -> usize {
    match value {
        Value::String(text) => usize::from(text.to_lowercase().contains(needle)),
        Value::Array(items) => items.iter().map(|item| match_count(item, needle)).sum(),
        Value::Object(members) => members.values().map(|v| match_count(v, needle)).sum(),
        _ => 0,
    }
}
