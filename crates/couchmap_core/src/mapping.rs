//! Entity configuration: accessors, conventions, and the registry.
//!
//! The registry is built once, up front, and is immutable afterwards. All
//! member access goes through closures supplied at configuration time -
//! there is no reflection and no global state.

use crate::error::{MappingError, SessionError, SessionResult};
use couchmap_store::{Document, DocumentId, Revision};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A shared entity cell.
///
/// Entities are held behind `Arc<RwLock<_>>` so that the caller and the
/// session can both reach them; reference identity is `Arc` pointer identity.
pub type Shared<T> = Arc<RwLock<T>>;

/// Wraps an entity in a [`Shared`] cell.
pub fn shared<T>(entity: T) -> Shared<T> {
    Arc::new(RwLock::new(entity))
}

/// Marker for types that can be mapped to documents.
///
/// Blanket-implemented for every serde-capable `'static` type.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T: Serialize + DeserializeOwned + Send + Sync + 'static> Entity for T {}

type ToDocumentIdFn = Box<dyn Fn(&str, &str) -> String + Send + Sync>;
type FromDocumentIdFn = Box<dyn Fn(&str, &str) -> Option<String> + Send + Sync>;

/// Configuration for one entity type.
///
/// Binds the entity type to a document type string and supplies the member
/// accessors and id conversions the session needs. Document-type families
/// are represented as one registered tagged enum, with serde resolving the
/// concrete variant on deserialization.
///
/// # Example
///
/// ```rust,ignore
/// let config = EntityConfig::new(
///     "user",
///     |u: &User| u.id.clone(),
///     |u: &mut User, id| u.id = id,
/// )
/// .revision(|u: &User| u.revision.clone(), |u, rev| u.revision = Some(rev))
/// .generate_uuid_ids();
/// ```
pub struct EntityConfig<T> {
    document_type: String,
    get_id: Box<dyn Fn(&T) -> String + Send + Sync>,
    set_id: Box<dyn Fn(&mut T, String) + Send + Sync>,
    get_revision: Option<Box<dyn Fn(&T) -> Option<Revision> + Send + Sync>>,
    set_revision: Option<Box<dyn Fn(&mut T, Revision) + Send + Sync>>,
    id_field: String,
    revision_field: String,
    generate_id: Option<Box<dyn Fn() -> String + Send + Sync>>,
    to_document_id: ToDocumentIdFn,
    from_document_id: FromDocumentIdFn,
}

impl<T: Entity> EntityConfig<T> {
    /// Creates a configuration with the mandatory id accessors.
    ///
    /// The default document id convention is `{document_type}.{entity_id}`,
    /// and the default serde member names are `id` and `revision`.
    pub fn new(
        document_type: impl Into<String>,
        get_id: impl Fn(&T) -> String + Send + Sync + 'static,
        set_id: impl Fn(&mut T, String) + Send + Sync + 'static,
    ) -> Self {
        Self {
            document_type: document_type.into(),
            get_id: Box::new(get_id),
            set_id: Box::new(set_id),
            get_revision: None,
            set_revision: None,
            id_field: "id".to_string(),
            revision_field: "revision".to_string(),
            generate_id: None,
            to_document_id: Box::new(|doc_type, id| format!("{doc_type}.{id}")),
            from_document_id: Box::new(|doc_type, doc_id| {
                doc_id
                    .strip_prefix(doc_type)
                    .and_then(|rest| rest.strip_prefix('.'))
                    .map(str::to_string)
            }),
        }
    }

    /// Declares the entity's revision member via accessors.
    ///
    /// Without this, revisions are tracked only in the session cache and the
    /// entity never sees them.
    #[must_use]
    pub fn revision(
        mut self,
        get: impl Fn(&T) -> Option<Revision> + Send + Sync + 'static,
        set: impl Fn(&mut T, Revision) + Send + Sync + 'static,
    ) -> Self {
        self.get_revision = Some(Box::new(get));
        self.set_revision = Some(Box::new(set));
        self
    }

    /// Names the id member in the entity's serde output.
    ///
    /// The member is stripped from document fields on serialization and
    /// injected back on deserialization.
    #[must_use]
    pub fn id_field(mut self, name: impl Into<String>) -> Self {
        self.id_field = name.into();
        self
    }

    /// Names the revision member in the entity's serde output.
    #[must_use]
    pub fn revision_field(mut self, name: impl Into<String>) -> Self {
        self.revision_field = name.into();
        self
    }

    /// Supplies an id generator, applied on save when the id member is empty.
    #[must_use]
    pub fn generate_id_with(mut self, generate: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.generate_id = Some(Box::new(generate));
        self
    }

    /// Generates random UUID ids for unassigned entities.
    #[must_use]
    pub fn generate_uuid_ids(self) -> Self {
        self.generate_id_with(|| Uuid::new_v4().to_string())
    }

    /// Replaces the id ↔ document-id conversion convention.
    ///
    /// `to` receives `(document_type, entity_id)`; `from` receives
    /// `(document_type, document_id)` and returns `None` when the document id
    /// does not match the convention.
    #[must_use]
    pub fn document_id_conversion(
        mut self,
        to: impl Fn(&str, &str) -> String + Send + Sync + 'static,
        from: impl Fn(&str, &str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.to_document_id = Box::new(to);
        self.from_document_id = Box::new(from);
        self
    }

    /// Returns the document type string.
    #[must_use]
    pub fn document_type(&self) -> &str {
        &self.document_type
    }

    /// Converts an entity id to its document id.
    #[must_use]
    pub fn document_id_for(&self, entity_id: &str) -> DocumentId {
        DocumentId::new((self.to_document_id)(&self.document_type, entity_id))
    }

    /// Converts a document id back to the entity id, if it matches the
    /// convention.
    #[must_use]
    pub fn entity_id_for(&self, document_id: &DocumentId) -> Option<String> {
        (self.from_document_id)(&self.document_type, document_id.as_str())
    }

    /// Reads the entity's id member.
    pub(crate) fn read_id(&self, entity: &T) -> String {
        (self.get_id)(entity)
    }

    /// Writes the entity's id member.
    pub(crate) fn write_id(&self, entity: &mut T, id: String) {
        (self.set_id)(entity, id);
    }

    /// Reads the entity's revision member, if one is declared.
    pub(crate) fn read_revision(&self, entity: &T) -> Option<Revision> {
        self.get_revision.as_ref().and_then(|get| get(entity))
    }

    /// Writes the entity's revision member, if one is declared.
    pub(crate) fn write_revision(&self, entity: &mut T, revision: Revision) {
        if let Some(set) = &self.set_revision {
            set(entity, revision);
        }
    }

    /// Returns true if the entity declares a revision member.
    #[must_use]
    pub fn has_revision_accessor(&self) -> bool {
        self.get_revision.is_some()
    }

    /// Produces a generated id, if a generator is configured.
    pub(crate) fn generated_id(&self) -> Option<String> {
        self.generate_id.as_ref().map(|generate| generate())
    }

    /// Serializes the entity into document fields.
    ///
    /// The id and revision members are stripped; they live in the document
    /// envelope instead.
    pub(crate) fn serialize_fields(&self, entity: &T) -> SessionResult<Map<String, Value>> {
        let value = serde_json::to_value(entity).map_err(SessionError::mapping)?;
        let Value::Object(mut fields) = value else {
            return Err(SessionError::mapping(format!(
                "entity of type {} does not serialize to a JSON object",
                std::any::type_name::<T>()
            )));
        };
        fields.remove(&self.id_field);
        fields.remove(&self.revision_field);
        Ok(fields)
    }

    /// Deserializes an entity from document fields.
    ///
    /// The entity id and revision are injected under the configured member
    /// names before deserialization, so entities with mandatory id members
    /// round-trip.
    pub(crate) fn deserialize_entity(
        &self,
        document: &Document,
        entity_id: &str,
    ) -> SessionResult<T> {
        let mut fields = document.fields().clone();
        fields.insert(self.id_field.clone(), Value::String(entity_id.to_string()));
        if let Some(revision) = document.revision() {
            fields.insert(
                self.revision_field.clone(),
                Value::String(revision.as_str().to_string()),
            );
        }
        serde_json::from_value(Value::Object(fields)).map_err(SessionError::mapping)
    }
}

impl<T> fmt::Debug for EntityConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityConfig")
            .field("document_type", &self.document_type)
            .field("id_field", &self.id_field)
            .finish_non_exhaustive()
    }
}

/// One registered entity type.
struct Registration {
    entity_type_name: &'static str,
    document_type: String,
    /// Holds an `Arc<EntityConfig<T>>`, recovered by downcast.
    config: Box<dyn Any + Send + Sync>,
}

/// Builder for a [`Mapping`].
#[derive(Default)]
pub struct MappingBuilder {
    registrations: Vec<(TypeId, Registration)>,
}

impl MappingBuilder {
    /// Registers an entity type.
    #[must_use]
    pub fn entity<T: Entity>(mut self, config: EntityConfig<T>) -> Self {
        self.registrations.push((
            TypeId::of::<T>(),
            Registration {
                entity_type_name: std::any::type_name::<T>(),
                document_type: config.document_type().to_string(),
                config: Box::new(Arc::new(config)),
            },
        ));
        self
    }

    /// Builds the immutable registry.
    ///
    /// # Errors
    ///
    /// Fails if an entity type was registered more than once.
    pub fn build(self) -> Result<Mapping, MappingError> {
        let mut by_type = HashMap::new();
        for (entity_type, registration) in self.registrations {
            if by_type.contains_key(&entity_type) {
                return Err(MappingError::DuplicateRegistration {
                    entity_type: registration.entity_type_name,
                });
            }
            by_type.insert(entity_type, registration);
        }
        Ok(Mapping { by_type })
    }
}

/// The entity configuration registry.
///
/// Built once via [`Mapping::builder`], then shared read-only between
/// sessions. Lookup failures surface as
/// [`SessionError::NotRegistered`](crate::SessionError::NotRegistered) on
/// first use.
pub struct Mapping {
    by_type: HashMap<TypeId, Registration>,
}

impl Mapping {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> MappingBuilder {
        MappingBuilder::default()
    }

    /// Returns the configuration for an entity type, if registered.
    #[must_use]
    pub fn config_for<T: Entity>(&self) -> Option<Arc<EntityConfig<T>>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|registration| registration.config.downcast_ref::<Arc<EntityConfig<T>>>())
            .cloned()
    }

    /// Returns true if the entity type is registered.
    #[must_use]
    pub fn is_registered<T: 'static>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    /// Returns the document type string for an entity type, if registered.
    #[must_use]
    pub fn document_type_of<T: 'static>(&self) -> Option<&str> {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|registration| registration.document_type.as_str())
    }

    /// Returns the number of registered entity types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut doc_types: Vec<&str> = self
            .by_type
            .values()
            .map(|registration| registration.document_type.as_str())
            .collect();
        doc_types.sort_unstable();
        f.debug_struct("Mapping")
            .field("document_types", &doc_types)
            .finish()
    }
}
