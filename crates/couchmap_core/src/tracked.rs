//! The document-entity wrapper.

use crate::error::{SessionError, SessionResult};
use crate::mapping::{Entity, EntityConfig, Shared};
use couchmap_store::{Document, DocumentId, DocumentParseError, Revision};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

type SerializeFn = Box<dyn Fn() -> SessionResult<Map<String, Value>> + Send + Sync>;
type WriteRevisionFn = Box<dyn Fn(Revision) + Send + Sync>;

/// Couples one entity instance to its document representation.
///
/// A wrapper binds exactly one [`Shared`] entity cell to its document
/// id/type/revision triple for the lifetime of tracking, and detects
/// modification of the entity by comparing its current serialized form
/// against the snapshot taken at the last [`map`](TrackedDocument::map).
///
/// The wrapper only ever touches the entity's id and revision members - the
/// accessors configured on the entity type - never arbitrary state.
pub struct TrackedDocument {
    /// The entity cell, erased. Kept alive by the closures below as well.
    entity: Arc<dyn Any + Send + Sync>,
    entity_type: TypeId,
    entity_type_name: &'static str,
    document_id: DocumentId,
    document_type: String,
    revision: Option<Revision>,
    /// Serialized fields at the last map. `None` forces the next
    /// `is_changed` to report true.
    snapshot: Option<Map<String, Value>>,
    serialize: SerializeFn,
    write_revision: WriteRevisionFn,
}

impl TrackedDocument {
    /// Builds a wrapper around an entity the caller supplied.
    ///
    /// # Errors
    ///
    /// Fails with [`SessionError::MissingId`] if the configured id getter
    /// returns an empty id. The id must be assigned or generated before this
    /// call.
    pub fn from_entity<T: Entity>(
        entity: &Shared<T>,
        config: &Arc<EntityConfig<T>>,
    ) -> SessionResult<Self> {
        let entity_id = config.read_id(&entity.read());
        if entity_id.is_empty() {
            return Err(SessionError::MissingId {
                entity_type: std::any::type_name::<T>(),
            });
        }
        let revision = config.read_revision(&entity.read());

        Ok(Self::from_parts(entity, config, &entity_id, revision))
    }

    /// Builds a wrapper by deserializing a document into a fresh entity.
    ///
    /// # Errors
    ///
    /// Fails with a parse error if the document type does not match the
    /// configuration, the revision is missing, or the document id does not
    /// match the configured conversion. Deserialization failures surface as
    /// mapping errors.
    pub fn from_document<T: Entity>(
        document: &Document,
        config: &Arc<EntityConfig<T>>,
    ) -> SessionResult<Self> {
        if document.doc_type() != config.document_type() {
            return Err(parse_error(
                document,
                format!(
                    "document type {} does not match configured type {}",
                    document.doc_type(),
                    config.document_type()
                ),
            ));
        }
        let Some(revision) = document.revision().cloned() else {
            return Err(parse_error(document, "document has no revision"));
        };
        let Some(entity_id) = config.entity_id_for(document.id()) else {
            return Err(parse_error(
                document,
                format!(
                    "document id {} does not match the configured convention",
                    document.id()
                ),
            ));
        };

        let mut value = config.deserialize_entity(document, &entity_id)?;
        config.write_id(&mut value, entity_id.clone());
        config.write_revision(&mut value, revision.clone());

        let cell = Arc::new(RwLock::new(value));
        let mut tracked = Self::from_parts(&cell, config, &entity_id, Some(revision));
        // Snapshot the entity's own serialized form, not the raw document
        // fields, so serde normalization cannot fake a modification.
        tracked.map()?;
        Ok(tracked)
    }

    fn from_parts<T: Entity>(
        entity: &Shared<T>,
        config: &Arc<EntityConfig<T>>,
        entity_id: &str,
        revision: Option<Revision>,
    ) -> Self {
        let serialize: SerializeFn = {
            let cell = Arc::clone(entity);
            let config = Arc::clone(config);
            Box::new(move || config.serialize_fields(&cell.read()))
        };
        let write_revision: WriteRevisionFn = {
            let cell = Arc::clone(entity);
            let config = Arc::clone(config);
            Box::new(move |revision| config.write_revision(&mut cell.write(), revision))
        };

        Self {
            entity: Arc::clone(entity) as Arc<dyn Any + Send + Sync>,
            entity_type: TypeId::of::<T>(),
            entity_type_name: std::any::type_name::<T>(),
            document_id: config.document_id_for(entity_id),
            document_type: config.document_type().to_string(),
            revision,
            snapshot: None,
            serialize,
            write_revision,
        }
    }

    /// Serializes the current entity state into its document, refreshing the
    /// dirty-check snapshot.
    pub fn map(&mut self) -> SessionResult<Document> {
        let fields = (self.serialize)()?;
        self.snapshot = Some(fields.clone());
        let mut document = Document::new(
            self.document_id.clone(),
            self.document_type.clone(),
            fields,
        );
        if let Some(revision) = &self.revision {
            document.set_revision(revision.clone());
        }
        Ok(document)
    }

    /// Returns true if the entity's current serialized form differs from the
    /// last-mapped snapshot.
    pub fn is_changed(&self) -> SessionResult<bool> {
        match &self.snapshot {
            None => Ok(true),
            Some(snapshot) => Ok((self.serialize)()? != *snapshot),
        }
    }

    /// Invalidates the snapshot so the next flush re-submits this wrapper.
    pub fn mark_dirty(&mut self) {
        self.snapshot = None;
    }

    /// Updates the tracked revision and writes it onto the entity's revision
    /// member, if one is declared.
    pub fn set_revision(&mut self, revision: Revision) {
        (self.write_revision)(revision.clone());
        self.revision = Some(revision);
    }

    /// Returns the last-known revision.
    #[must_use]
    pub fn revision(&self) -> Option<&Revision> {
        self.revision.as_ref()
    }

    /// Returns the document id.
    #[must_use]
    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    /// Returns the document type string.
    #[must_use]
    pub fn document_type(&self) -> &str {
        &self.document_type
    }

    /// Returns the tracked entity type.
    #[must_use]
    pub fn entity_type(&self) -> TypeId {
        self.entity_type
    }

    /// Returns the tracked entity type's name, for diagnostics.
    #[must_use]
    pub fn entity_type_name(&self) -> &'static str {
        self.entity_type_name
    }

    /// Returns the tracked entity cell.
    ///
    /// # Errors
    ///
    /// Fails with [`SessionError::TypeMismatch`] if `T` is not the tracked
    /// entity type.
    pub fn entity_cell<T: Entity>(&self) -> SessionResult<Shared<T>> {
        if self.entity_type != TypeId::of::<T>() {
            return Err(self.type_mismatch::<T>());
        }
        Arc::clone(&self.entity)
            .downcast::<RwLock<T>>()
            .map_err(|_| self.type_mismatch::<T>())
    }

    /// Identity key of the tracked entity reference.
    pub(crate) fn entity_key(&self) -> usize {
        Arc::as_ptr(&self.entity) as *const () as usize
    }

    fn type_mismatch<T>(&self) -> SessionError {
        SessionError::TypeMismatch {
            document_id: self.document_id.clone(),
            requested: std::any::type_name::<T>(),
            actual: self.entity_type_name,
        }
    }
}

/// Identity key of a shared entity cell, comparable with
/// [`TrackedDocument::entity_key`].
pub(crate) fn entity_key_of<T>(cell: &Shared<T>) -> usize {
    Arc::as_ptr(cell) as *const () as usize
}

fn parse_error(document: &Document, message: impl Into<String>) -> SessionError {
    SessionError::Parse(DocumentParseError::with_text(
        message,
        document.to_json().to_string(),
    ))
}

impl fmt::Debug for TrackedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedDocument")
            .field("document_id", &self.document_id)
            .field("document_type", &self.document_type)
            .field("entity_type", &self.entity_type_name)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::shared;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestUser {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        revision: Option<Revision>,
        name: String,
        age: u32,
    }

    fn user(id: &str, name: &str, age: u32) -> TestUser {
        TestUser {
            id: id.to_string(),
            revision: None,
            name: name.to_string(),
            age,
        }
    }

    fn config() -> Arc<EntityConfig<TestUser>> {
        Arc::new(
            EntityConfig::new(
                "user",
                |u: &TestUser| u.id.clone(),
                |u: &mut TestUser, id| u.id = id,
            )
            .revision(|u: &TestUser| u.revision.clone(), |u, rev| {
                u.revision = Some(rev)
            }),
        )
    }

    #[test]
    fn from_entity_requires_id() {
        let cell = shared(user("", "Alice", 30));
        let err = TrackedDocument::from_entity(&cell, &config()).unwrap_err();
        assert!(matches!(err, SessionError::MissingId { .. }));
    }

    #[test]
    fn map_produces_document() {
        let cell = shared(user("42", "Alice", 30));
        let mut tracked = TrackedDocument::from_entity(&cell, &config()).unwrap();

        let document = tracked.map().unwrap();
        assert_eq!(document.id().as_str(), "user.42");
        assert_eq!(document.doc_type(), "user");
        assert!(document.is_new());
        assert_eq!(document.field("name"), Some(&json!("Alice")));
        assert!(document.field("id").is_none());
    }

    #[test]
    fn unmapped_wrapper_is_dirty() {
        let cell = shared(user("42", "Alice", 30));
        let tracked = TrackedDocument::from_entity(&cell, &config()).unwrap();
        assert!(tracked.is_changed().unwrap());
    }

    #[test]
    fn mutation_is_detected() {
        let cell = shared(user("42", "Alice", 30));
        let mut tracked = TrackedDocument::from_entity(&cell, &config()).unwrap();
        tracked.map().unwrap();
        assert!(!tracked.is_changed().unwrap());

        cell.write().age = 31;
        assert!(tracked.is_changed().unwrap());

        tracked.map().unwrap();
        assert!(!tracked.is_changed().unwrap());
    }

    #[test]
    fn set_revision_reaches_entity_without_dirtying() {
        let cell = shared(user("42", "Alice", 30));
        let mut tracked = TrackedDocument::from_entity(&cell, &config()).unwrap();
        tracked.map().unwrap();

        tracked.set_revision(Revision::new("1-abc"));
        assert_eq!(cell.read().revision, Some(Revision::new("1-abc")));
        assert_eq!(tracked.revision(), Some(&Revision::new("1-abc")));
        // The revision member is part of the envelope, not the fields.
        assert!(!tracked.is_changed().unwrap());
    }

    #[test]
    fn mark_dirty_forces_resubmission() {
        let cell = shared(user("42", "Alice", 30));
        let mut tracked = TrackedDocument::from_entity(&cell, &config()).unwrap();
        tracked.map().unwrap();
        assert!(!tracked.is_changed().unwrap());

        tracked.mark_dirty();
        assert!(tracked.is_changed().unwrap());
    }

    fn stored_doc(id: &str, rev: Option<&str>, doc_type: &str) -> Document {
        let mut document = Document::new(
            DocumentId::new(id),
            doc_type,
            json!({"name": "Alice", "age": 30}).as_object().unwrap().clone(),
        );
        if let Some(rev) = rev {
            document.set_revision(Revision::new(rev));
        }
        document
    }

    #[test]
    fn from_document_roundtrip() {
        let document = stored_doc("user.42", Some("1-abc"), "user");
        let tracked = TrackedDocument::from_document(&document, &config()).unwrap();

        assert_eq!(tracked.document_id().as_str(), "user.42");
        assert_eq!(tracked.revision(), Some(&Revision::new("1-abc")));
        assert!(!tracked.is_changed().unwrap());

        let cell = tracked.entity_cell::<TestUser>().unwrap();
        let entity = cell.read();
        assert_eq!(entity.id, "42");
        assert_eq!(entity.revision, Some(Revision::new("1-abc")));
        assert_eq!(entity.name, "Alice");
    }

    #[test]
    fn from_document_rejects_wrong_type() {
        let document = stored_doc("user.42", Some("1-abc"), "cat");
        let err = TrackedDocument::from_document(&document, &config()).unwrap_err();
        match err {
            SessionError::Parse(parse) => assert!(parse.document.contains("Alice")),
            other => panic!("expected parse error, got {other}"),
        }
    }

    #[test]
    fn from_document_requires_revision() {
        let document = stored_doc("user.42", None, "user");
        let err = TrackedDocument::from_document(&document, &config()).unwrap_err();
        assert!(matches!(err, SessionError::Parse(_)));
    }

    #[test]
    fn from_document_rejects_foreign_id() {
        let document = stored_doc("cat.42", Some("1-abc"), "user");
        let err = TrackedDocument::from_document(&document, &config()).unwrap_err();
        assert!(matches!(err, SessionError::Parse(_)));
    }

    #[test]
    fn entity_cell_type_mismatch() {
        let cell = shared(user("42", "Alice", 30));
        let tracked = TrackedDocument::from_entity(&cell, &config()).unwrap();

        let err = tracked.entity_cell::<String>().unwrap_err();
        assert!(matches!(err, SessionError::TypeMismatch { .. }));
    }

    #[test]
    fn entity_identity_keys_agree() {
        let cell = shared(user("42", "Alice", 30));
        let tracked = TrackedDocument::from_entity(&cell, &config()).unwrap();
        assert_eq!(tracked.entity_key(), entity_key_of(&cell));

        let other = shared(user("43", "Bob", 25));
        assert_ne!(tracked.entity_key(), entity_key_of(&other));
    }

    proptest! {
        // Mapping twice without intervening mutation never reports a change.
        #[test]
        fn dirty_detection_is_idempotent(name in ".{0,32}", age in any::<u32>()) {
            let cell = shared(user("42", &name, age));
            let mut tracked = TrackedDocument::from_entity(&cell, &config()).unwrap();
            tracked.map().unwrap();
            tracked.map().unwrap();
            prop_assert!(!tracked.is_changed().unwrap());
        }
    }
}
