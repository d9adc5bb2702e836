//! The session-scoped unit-of-work cache.

use crate::error::{SessionError, SessionResult};
use crate::mapping::Shared;
use crate::tracked::{entity_key_of, TrackedDocument};
use couchmap_store::DocumentId;
use std::collections::HashMap;

/// A keyed collection of tracked documents with two unique indices.
///
/// Wrappers are indexed by document id and by entity reference. At most one
/// wrapper may exist per document id, and at most one per entity reference;
/// [`put`](UnitOfWork::put) enforces both.
///
/// The cache performs no I/O and is not synchronized - the owning
/// [`Session`](crate::Session) serializes all access to it.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    by_id: HashMap<DocumentId, TrackedDocument>,
    by_entity: HashMap<usize, DocumentId>,
}

impl UnitOfWork {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a wrapper under both indices.
    ///
    /// # Errors
    ///
    /// Fails with [`SessionError::AlreadyTracked`] if a wrapper for that
    /// document id or that entity reference already exists. Mutation goes
    /// through the tracked entity's fields, never through re-insertion.
    pub fn put(&mut self, tracked: TrackedDocument) -> SessionResult<()> {
        let document_id = tracked.document_id().clone();
        if self.by_id.contains_key(&document_id)
            || self.by_entity.contains_key(&tracked.entity_key())
        {
            return Err(SessionError::AlreadyTracked { document_id });
        }
        self.by_entity.insert(tracked.entity_key(), document_id.clone());
        self.by_id.insert(document_id, tracked);
        Ok(())
    }

    /// Returns true if a wrapper exists for this document id.
    #[must_use]
    pub fn contains_id(&self, document_id: &DocumentId) -> bool {
        self.by_id.contains_key(document_id)
    }

    /// Returns true if this entity reference is tracked.
    #[must_use]
    pub fn contains_entity<T>(&self, entity: &Shared<T>) -> bool {
        self.by_entity.contains_key(&entity_key_of(entity))
    }

    /// Looks up a wrapper by document id.
    ///
    /// The caller is responsible for verifying the tracked entity type
    /// against the statically requested one (see
    /// [`TrackedDocument::entity_cell`]).
    #[must_use]
    pub fn get(&self, document_id: &DocumentId) -> Option<&TrackedDocument> {
        self.by_id.get(document_id)
    }

    /// Looks up a wrapper by document id, mutably.
    pub fn get_mut(&mut self, document_id: &DocumentId) -> Option<&mut TrackedDocument> {
        self.by_id.get_mut(document_id)
    }

    /// Looks up a wrapper by entity reference.
    #[must_use]
    pub fn get_by_entity<T>(&self, entity: &Shared<T>) -> Option<&TrackedDocument> {
        self.by_entity
            .get(&entity_key_of(entity))
            .and_then(|document_id| self.by_id.get(document_id))
    }

    /// Removes a wrapper from both indices. A no-op if absent.
    pub fn remove(&mut self, document_id: &DocumentId) -> Option<TrackedDocument> {
        let tracked = self.by_id.remove(document_id)?;
        self.by_entity.remove(&tracked.entity_key());
        Some(tracked)
    }

    /// Enumerates all tracked wrappers.
    pub fn iter(&self) -> impl Iterator<Item = &TrackedDocument> {
        self.by_id.values()
    }

    /// Returns all tracked document ids.
    #[must_use]
    pub fn document_ids(&self) -> Vec<DocumentId> {
        self.by_id.keys().cloned().collect()
    }

    /// Drops all tracking.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_entity.clear();
    }

    /// Returns the number of tracked wrappers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{shared, EntityConfig};
    use couchmap_store::Revision;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestUser {
        id: String,
        name: String,
    }

    fn config() -> Arc<EntityConfig<TestUser>> {
        Arc::new(EntityConfig::new(
            "user",
            |u: &TestUser| u.id.clone(),
            |u: &mut TestUser, id| u.id = id,
        ))
    }

    fn tracked(id: &str) -> (crate::Shared<TestUser>, TrackedDocument) {
        let cell = shared(TestUser {
            id: id.to_string(),
            name: "Alice".to_string(),
        });
        let tracked = TrackedDocument::from_entity(&cell, &config()).unwrap();
        (cell, tracked)
    }

    #[test]
    fn put_and_lookup() {
        let mut cache = UnitOfWork::new();
        let (cell, wrapper) = tracked("1");
        cache.put(wrapper).unwrap();

        assert_eq!(cache.len(), 1);
        assert!(cache.contains_id(&DocumentId::new("user.1")));
        assert!(cache.contains_entity(&cell));
        assert!(cache.get(&DocumentId::new("user.1")).is_some());
        assert!(cache.get_by_entity(&cell).is_some());
    }

    #[test]
    fn duplicate_document_id_rejected() {
        let mut cache = UnitOfWork::new();
        let (_cell_a, first) = tracked("1");
        let (_cell_b, second) = tracked("1");
        cache.put(first).unwrap();

        let err = cache.put(second).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyTracked { .. }));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn duplicate_entity_reference_rejected() {
        let mut cache = UnitOfWork::new();
        let (cell, first) = tracked("1");
        cache.put(first).unwrap();

        // Same cell, different document id: still one wrapper per reference.
        cell.write().id = "2".to_string();
        let second = TrackedDocument::from_entity(&cell, &config()).unwrap();
        let err = cache.put(second).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyTracked { .. }));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut cache = UnitOfWork::new();
        let (cell, wrapper) = tracked("1");
        cache.put(wrapper).unwrap();

        assert!(cache.remove(&DocumentId::new("user.1")).is_some());
        assert!(cache.remove(&DocumentId::new("user.1")).is_none());
        assert!(!cache.contains_entity(&cell));
        assert!(cache.is_empty());
    }

    #[test]
    fn removed_entity_can_be_reinserted() {
        let mut cache = UnitOfWork::new();
        let (cell, wrapper) = tracked("1");
        cache.put(wrapper).unwrap();
        cache.remove(&DocumentId::new("user.1"));

        let again = TrackedDocument::from_entity(&cell, &config()).unwrap();
        cache.put(again).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn iteration_and_clear() {
        let mut cache = UnitOfWork::new();
        let mut wrappers = Vec::new();
        for i in 0..3 {
            let (cell, wrapper) = tracked(&i.to_string());
            wrappers.push(cell);
            cache.put(wrapper).unwrap();
        }

        assert_eq!(cache.iter().count(), 3);
        assert_eq!(cache.document_ids().len(), 3);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.iter().count(), 0);
    }

    #[test]
    fn wrapper_state_survives_tracking() {
        let mut cache = UnitOfWork::new();
        let (_cell, wrapper) = tracked("1");
        cache.put(wrapper).unwrap();

        let id = DocumentId::new("user.1");
        cache.get_mut(&id).unwrap().set_revision(Revision::new("1-abc"));
        assert_eq!(
            cache.get(&id).unwrap().revision(),
            Some(&Revision::new("1-abc"))
        );
    }
}
