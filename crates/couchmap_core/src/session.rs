//! The session: save/load/delete/query orchestration over one cache.

use crate::cache::UnitOfWork;
use crate::error::{SessionError, SessionResult};
use crate::mapping::{Entity, EntityConfig, Mapping, Shared};
use crate::query::Page;
use crate::tracked::TrackedDocument;
use couchmap_store::{
    BulkBatch, Document, DocumentId, DocumentStore, FullTextQuery, FullTextRow, StoreError,
    ViewQuery, ViewRow,
};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Creates [`Session`]s sharing one store handle and one mapping.
///
/// The factory is cheap to clone from; sessions are cheap to open. Open one
/// session per unit of work and drop it at the end - tracked state never
/// outlives the session.
#[derive(Clone)]
pub struct SessionFactory {
    store: Arc<dyn DocumentStore>,
    mapping: Arc<Mapping>,
}

impl SessionFactory {
    /// Creates a factory.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, mapping: Arc<Mapping>) -> Self {
        Self { store, mapping }
    }

    /// Opens a session with an empty cache.
    #[must_use]
    pub fn open_session(&self) -> Session {
        Session::new(Arc::clone(&self.store), Arc::clone(&self.mapping))
    }

    /// Opens a session wrapped in a blocking facade.
    ///
    /// See [`BlockingSession`](crate::BlockingSession) for the threading
    /// requirements.
    #[must_use]
    pub fn open_blocking_session(
        &self,
        handle: tokio::runtime::Handle,
    ) -> crate::BlockingSession {
        crate::BlockingSession::new(self.open_session(), handle)
    }

    /// Returns the shared store handle.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Returns the shared mapping.
    #[must_use]
    pub fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("mapping", &self.mapping)
            .finish_non_exhaustive()
    }
}

/// Outcome of a [`Session::save_changes`] flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Number of dirty documents submitted in the bulk call.
    pub submitted: usize,
    /// Documents whose server-assigned revision was applied.
    pub saved: Vec<DocumentId>,
    /// Submitted documents absent from the store's success map. They remain
    /// tracked and dirty; the next flush resubmits them.
    pub unacknowledged: Vec<DocumentId>,
}

/// A unit-of-work session over a document store.
///
/// A session tracks every entity it saves or loads in its private
/// [`UnitOfWork`] cache, giving repeatable reads and reference identity
/// within the session: loading the same id twice yields the same `Arc`.
/// Mutations accumulate on the tracked entities and are committed in one
/// bulk call by [`save_changes`](Session::save_changes).
///
/// # Concurrency
///
/// Every operation holds the session's FIFO-fair async mutex for its full
/// duration, including the store round trip. This is the single-flight
/// discipline: while a flush is outstanding no other operation can touch the
/// cache or reach the store, and operations issued meanwhile run strictly
/// afterwards, in arrival order. The cache is private to the session and
/// must never be shared across sessions.
///
/// # Lifetime
///
/// Dropping the session drops all tracking without flushing. Entities the
/// caller still holds survive, merely untracked; unflushed mutations are not
/// persisted.
pub struct Session {
    store: Arc<dyn DocumentStore>,
    mapping: Arc<Mapping>,
    cache: Mutex<UnitOfWork>,
}

impl Session {
    /// Creates a session with an empty cache.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, mapping: Arc<Mapping>) -> Self {
        Self {
            store,
            mapping,
            cache: Mutex::new(UnitOfWork::new()),
        }
    }

    /// Persists a new entity and starts tracking it.
    ///
    /// This is a direct write-through: the store call happens here, so id
    /// rejection surfaces immediately instead of at the next flush. On
    /// success the server-assigned revision is written back onto the entity.
    ///
    /// If the id member is empty and the configuration has an id generator,
    /// an id is generated and assigned first.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyTracked`] if the entity, or another entity
    ///   with the same document id, is already tracked
    /// - [`SessionError::AlreadyPersisted`] if the entity carries a revision;
    ///   persisted entities are mutated and flushed, not saved again
    /// - [`SessionError::MissingId`] if no id is assigned and none can be
    ///   generated
    pub async fn save<T: Entity>(&self, entity: &Shared<T>) -> SessionResult<()> {
        let config = self.config_for::<T>()?;
        let mut cache = self.cache.lock().await;

        if let Some(tracked) = cache.get_by_entity(entity) {
            return Err(SessionError::AlreadyTracked {
                document_id: tracked.document_id().clone(),
            });
        }
        if config.read_revision(&entity.read()).is_some() {
            let id = config.read_id(&entity.read());
            return Err(SessionError::AlreadyPersisted {
                document_id: config.document_id_for(&id),
            });
        }

        let id = config.read_id(&entity.read());
        if id.is_empty() {
            let Some(generated) = config.generated_id() else {
                return Err(SessionError::MissingId {
                    entity_type: std::any::type_name::<T>(),
                });
            };
            config.write_id(&mut entity.write(), generated);
        }

        let mut tracked = TrackedDocument::from_entity(entity, &config)?;
        if cache.contains_id(tracked.document_id()) {
            return Err(SessionError::AlreadyTracked {
                document_id: tracked.document_id().clone(),
            });
        }

        let document = tracked.map()?;
        let head = self.store.save_document(&document).await?;
        tracked.set_revision(head.revision);
        cache.put(tracked)?;
        Ok(())
    }

    /// Deletes an entity from the store and stops tracking it.
    ///
    /// The revision comes from the cache when the entity is tracked, or from
    /// the entity's own revision member otherwise. The wrapper is removed
    /// from the cache before the store call, so it is absent regardless of
    /// the outcome.
    ///
    /// # Errors
    ///
    /// Fails with [`SessionError::MissingRevision`] when no revision can be
    /// resolved - the store's optimistic-concurrency precondition cannot be
    /// satisfied without one.
    pub async fn delete<T: Entity>(&self, entity: &Shared<T>) -> SessionResult<()> {
        let config = self.config_for::<T>()?;
        let mut cache = self.cache.lock().await;

        let (document_id, revision) = match cache.get_by_entity(entity) {
            Some(tracked) => (
                tracked.document_id().clone(),
                tracked
                    .revision()
                    .cloned()
                    .or_else(|| config.read_revision(&entity.read())),
            ),
            None => {
                let tracked = TrackedDocument::from_entity(entity, &config)?;
                (tracked.document_id().clone(), tracked.revision().cloned())
            }
        };

        let Some(revision) = revision else {
            return Err(SessionError::MissingRevision { document_id });
        };

        cache.remove(&document_id);
        self.store.delete_document(&document_id, &revision).await?;
        Ok(())
    }

    /// Loads an entity by id.
    ///
    /// A cache hit returns the already-tracked entity without any I/O - this
    /// is what gives the session repeatable reads and reference identity. A
    /// missing document is `Ok(None)`, not an error.
    ///
    /// # Errors
    ///
    /// Fails with [`SessionError::TypeMismatch`] if the document id is cached
    /// under an incompatible entity type.
    pub async fn load<T: Entity>(&self, id: &str) -> SessionResult<Option<Shared<T>>> {
        let config = self.config_for::<T>()?;
        let document_id = config.document_id_for(id);
        let mut cache = self.cache.lock().await;

        if let Some(tracked) = cache.get(&document_id) {
            return tracked.entity_cell::<T>().map(Some);
        }

        let document = match self.store.get_document(&document_id).await {
            Ok(Some(document)) => document,
            Ok(None) | Err(StoreError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let tracked = TrackedDocument::from_document(&document, &config)?;
        let cell = tracked.entity_cell::<T>()?;
        cache.put(tracked)?;
        Ok(Some(cell))
    }

    /// Runs a view query and materializes each row's embedded document as a
    /// tracked entity.
    ///
    /// Rows for already-tracked documents resolve to the existing entity -
    /// identity is preserved across load and query, and local modifications
    /// are never overwritten with server data.
    ///
    /// # Errors
    ///
    /// Rejects the query before any store call unless it requests embedded
    /// documents. A single row failure surfaces as itself; several aggregate
    /// into [`SessionError::Multiple`].
    pub async fn query<T: Entity>(&self, query: &ViewQuery) -> SessionResult<Page<Shared<T>>> {
        let config = self.config_for::<T>()?;
        if !query.include_docs {
            return Err(SessionError::invalid_query(
                "entity queries must request embedded documents",
            ));
        }
        let mut cache = self.cache.lock().await;
        let result = self.store.query_view(query).await?;
        let items = merge_rows(&mut cache, &config, result.rows.iter().map(|row| row.doc.as_ref()))?;
        Ok(Page {
            items,
            total_rows: result.total_rows,
            offset: result.offset,
        })
    }

    /// Runs a view query and deserializes each row's value into `T`.
    ///
    /// Projection only: nothing is tracked and no identity is preserved.
    pub async fn query_values<T: DeserializeOwned>(
        &self,
        query: &ViewQuery,
    ) -> SessionResult<Page<T>> {
        let _guard = self.cache.lock().await;
        let result = self.store.query_view(query).await?;
        let items = project_rows(result.rows.iter(), |row: &ViewRow| {
            serde_json::from_value(row.value.clone()).map_err(SessionError::mapping)
        })?;
        Ok(Page {
            items,
            total_rows: result.total_rows,
            offset: result.offset,
        })
    }

    /// Runs a view query with a caller-supplied row projection.
    pub async fn query_with<T, F>(&self, query: &ViewQuery, project: F) -> SessionResult<Page<T>>
    where
        F: Fn(&ViewRow) -> SessionResult<T>,
    {
        let _guard = self.cache.lock().await;
        let result = self.store.query_view(query).await?;
        let items = project_rows(result.rows.iter(), project)?;
        Ok(Page {
            items,
            total_rows: result.total_rows,
            offset: result.offset,
        })
    }

    /// Runs a full-text query and materializes each row's embedded document
    /// as a tracked entity.
    ///
    /// Same contract as [`query`](Session::query): embedded documents are
    /// required, and tracked documents keep their identity.
    pub async fn query_fulltext<T: Entity>(
        &self,
        query: &FullTextQuery,
    ) -> SessionResult<Page<Shared<T>>> {
        let config = self.config_for::<T>()?;
        if !query.include_docs {
            return Err(SessionError::invalid_query(
                "entity queries must request embedded documents",
            ));
        }
        let mut cache = self.cache.lock().await;
        let result = self.store.query_fulltext(query).await?;
        let items = merge_rows(&mut cache, &config, result.rows.iter().map(|row| row.doc.as_ref()))?;
        Ok(Page {
            items,
            total_rows: result.total_rows,
            offset: result.offset,
        })
    }

    /// Runs a full-text query with a caller-supplied row projection.
    pub async fn query_fulltext_with<T, F>(
        &self,
        query: &FullTextQuery,
        project: F,
    ) -> SessionResult<Page<T>>
    where
        F: Fn(&FullTextRow) -> SessionResult<T>,
    {
        let _guard = self.cache.lock().await;
        let result = self.store.query_fulltext(query).await?;
        let items = project_rows(result.rows.iter(), project)?;
        Ok(Page {
            items,
            total_rows: result.total_rows,
            offset: result.offset,
        })
    }

    /// Commits all modified tracked entities in one bulk call.
    ///
    /// Scans the cache for changed wrappers, re-maps each, and submits them
    /// as a single bulk update - unrevisioned wrappers as creates, revisioned
    /// ones as updates. Revisions from the store's success map are written
    /// back onto the saved wrappers and their entities.
    ///
    /// Entries absent from the success map stay tracked and dirty, are
    /// listed in [`FlushReport::unacknowledged`], and are resubmitted by the
    /// next flush; nothing is retried here.
    ///
    /// Only one flush can be in flight. A concurrent `save_changes` waits
    /// for the outstanding one, then computes its own fresh dirty set, so a
    /// mutation made while the first flush was running is captured by the
    /// second. The bulk call is issued even when nothing is dirty.
    pub async fn save_changes(&self) -> SessionResult<FlushReport> {
        let mut cache = self.cache.lock().await;

        let mut batch = BulkBatch::new();
        let mut submitted = Vec::new();
        for document_id in cache.document_ids() {
            let Some(tracked) = cache.get_mut(&document_id) else {
                continue;
            };
            if !tracked.is_changed()? {
                continue;
            }
            let document = tracked.map()?;
            if document.is_new() {
                batch.create(document);
            } else {
                batch.update(document);
            }
            submitted.push(document_id);
        }

        let heads = match self.store.bulk_update(batch).await {
            Ok(heads) => heads,
            Err(err) => {
                // Re-mapping refreshed the snapshots; the failed submission
                // must stay dirty.
                for document_id in &submitted {
                    if let Some(tracked) = cache.get_mut(document_id) {
                        tracked.mark_dirty();
                    }
                }
                return Err(err.into());
            }
        };

        let mut report = FlushReport {
            submitted: submitted.len(),
            ..FlushReport::default()
        };
        for document_id in submitted {
            let Some(tracked) = cache.get_mut(&document_id) else {
                continue;
            };
            match heads.get(&document_id) {
                Some(head) => {
                    tracked.set_revision(head.revision.clone());
                    report.saved.push(document_id);
                }
                None => {
                    tracked.mark_dirty();
                    report.unacknowledged.push(document_id);
                }
            }
        }

        if report.unacknowledged.is_empty() {
            debug!(submitted = report.submitted, "flushed session changes");
        } else {
            warn!(
                submitted = report.submitted,
                unacknowledged = report.unacknowledged.len(),
                "bulk update left documents unacknowledged; they stay dirty"
            );
        }

        Ok(report)
    }

    /// Drops all tracking without flushing.
    pub async fn clear(&self) {
        self.cache.lock().await.clear();
    }

    /// Returns the number of tracked entities.
    pub async fn tracked_count(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Returns true if this entity reference is tracked.
    pub async fn is_tracked<T>(&self, entity: &Shared<T>) -> bool {
        self.cache.lock().await.contains_entity(entity)
    }

    fn config_for<T: Entity>(&self) -> SessionResult<Arc<EntityConfig<T>>> {
        self.mapping
            .config_for::<T>()
            .ok_or(SessionError::NotRegistered {
                entity_type: std::any::type_name::<T>(),
            })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("mapping", &self.mapping)
            .finish_non_exhaustive()
    }
}

/// Materializes entity rows through the cache, aggregating row failures.
fn merge_rows<'a, T: Entity>(
    cache: &mut UnitOfWork,
    config: &Arc<EntityConfig<T>>,
    documents: impl Iterator<Item = Option<&'a Document>>,
) -> SessionResult<Vec<Shared<T>>> {
    let mut items = Vec::new();
    let mut failures = Vec::new();
    for document in documents {
        match merge_row(cache, config, document) {
            Ok(cell) => items.push(cell),
            Err(err) => failures.push(err),
        }
    }
    if failures.is_empty() {
        Ok(items)
    } else {
        Err(SessionError::aggregate(failures))
    }
}

/// Materializes one entity row, preferring the already-tracked entity.
fn merge_row<T: Entity>(
    cache: &mut UnitOfWork,
    config: &Arc<EntityConfig<T>>,
    document: Option<&Document>,
) -> SessionResult<Shared<T>> {
    let Some(document) = document else {
        return Err(SessionError::invalid_query(
            "query row carries no embedded document",
        ));
    };
    if let Some(tracked) = cache.get(document.id()) {
        // The tracked entity wins; rows never overwrite local state.
        return tracked.entity_cell::<T>();
    }
    let tracked = TrackedDocument::from_document(document, config)?;
    let cell = tracked.entity_cell::<T>()?;
    cache.put(tracked)?;
    Ok(cell)
}

/// Projects rows one-way, aggregating row failures.
fn project_rows<'a, R: 'a, T, F>(
    rows: impl Iterator<Item = &'a R>,
    project: F,
) -> SessionResult<Vec<T>>
where
    F: Fn(&R) -> SessionResult<T>,
{
    let mut items = Vec::new();
    let mut failures = Vec::new();
    for row in rows {
        match project(row) {
            Ok(item) => items.push(item),
            Err(err) => failures.push(err),
        }
    }
    if failures.is_empty() {
        Ok(items)
    } else {
        Err(SessionError::aggregate(failures))
    }
}
