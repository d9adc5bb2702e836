//! Document model: ids, revisions, and the JSON document envelope.

use crate::error::DocumentParseError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Reserved member carrying the document id on the wire.
pub const ID_MEMBER: &str = "_id";
/// Reserved member carrying the revision on the wire.
pub const REVISION_MEMBER: &str = "_rev";
/// Reserved member carrying the document type discriminator.
pub const DOC_TYPE_MEMBER: &str = "$doctype";

/// String key under which a document is stored.
///
/// Document ids are derived from entity ids via a configurable convention,
/// `{document_type}.{entity_id}` by default.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Creates a document id from a string key.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the id, returning the raw key.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Opaque, server-assigned optimistic-concurrency token.
///
/// A current revision must be supplied on every update and delete. Revisions
/// conventionally have the shape `{generation}-{suffix}`, with the generation
/// advancing on every update, but callers must treat the token as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Creates a revision from its string form.
    #[must_use]
    pub fn new(revision: impl Into<String>) -> Self {
        Self(revision.into())
    }

    /// Returns the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the numeric generation prefix, if the token has the
    /// conventional `{generation}-{suffix}` shape.
    #[must_use]
    pub fn generation(&self) -> Option<u64> {
        let (prefix, _) = self.0.split_once('-')?;
        prefix.parse().ok()
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Revision {
    fn from(revision: String) -> Self {
        Self(revision)
    }
}

impl From<&str> for Revision {
    fn from(revision: &str) -> Self {
        Self(revision.to_string())
    }
}

/// The JSON projection of an entity.
///
/// A document carries its id, a document type discriminator, an optional
/// revision, and the serialized entity fields. The envelope members are typed;
/// everything else lives in the ordered `fields` map. On the wire the envelope
/// occupies the reserved members `_id`, `_rev` and `$doctype`.
///
/// A document without a revision is new; a document with a revision has been
/// persisted at least once.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: DocumentId,
    doc_type: String,
    revision: Option<Revision>,
    fields: Map<String, Value>,
}

impl Document {
    /// Creates a new, unpersisted document.
    #[must_use]
    pub fn new(id: DocumentId, doc_type: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id,
            doc_type: doc_type.into(),
            revision: None,
            fields,
        }
    }

    /// Attaches a revision, marking the document as persisted.
    #[must_use]
    pub fn with_revision(mut self, revision: Revision) -> Self {
        self.revision = Some(revision);
        self
    }

    /// Returns the document id.
    #[must_use]
    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Returns the document type discriminator.
    #[must_use]
    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    /// Returns the current revision, if any.
    #[must_use]
    pub fn revision(&self) -> Option<&Revision> {
        self.revision.as_ref()
    }

    /// Sets the revision.
    pub fn set_revision(&mut self, revision: Revision) {
        self.revision = Some(revision);
    }

    /// Returns true if the document has never been persisted.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.revision.is_none()
    }

    /// Returns the serialized entity fields.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns a single field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Consumes the document, returning the fields.
    #[must_use]
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// Parses a document from its wire JSON object.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentParseError`] carrying the offending document text
    /// if the value is not an object, or if the `_id` or `$doctype` members
    /// are missing or malformed.
    pub fn from_json(value: Value) -> Result<Self, DocumentParseError> {
        let Value::Object(mut members) = value else {
            return Err(DocumentParseError::new("document is not a JSON object", &value));
        };

        let id = match members.get(ID_MEMBER) {
            Some(Value::String(id)) if !id.is_empty() => DocumentId::new(id.clone()),
            _ => {
                return Err(DocumentParseError::new(
                    "document has no _id member",
                    &Value::Object(members),
                ))
            }
        };

        let doc_type = match members.get(DOC_TYPE_MEMBER) {
            Some(Value::String(doc_type)) if !doc_type.is_empty() => doc_type.clone(),
            _ => {
                return Err(DocumentParseError::new(
                    "document has no $doctype member",
                    &Value::Object(members),
                ))
            }
        };

        let revision = match members.get(REVISION_MEMBER) {
            Some(Value::String(revision)) => Some(Revision::new(revision.clone())),
            Some(_) => {
                return Err(DocumentParseError::new(
                    "document _rev member is not a string",
                    &Value::Object(members),
                ))
            }
            None => None,
        };

        members.remove(ID_MEMBER);
        members.remove(DOC_TYPE_MEMBER);
        members.remove(REVISION_MEMBER);

        Ok(Self {
            id,
            doc_type,
            revision,
            fields: members,
        })
    }

    /// Serializes the document to its wire JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut members = Map::new();
        members.insert(ID_MEMBER.into(), Value::String(self.id.as_str().into()));
        if let Some(revision) = &self.revision {
            members.insert(
                REVISION_MEMBER.into(),
                Value::String(revision.as_str().into()),
            );
        }
        members.insert(DOC_TYPE_MEMBER.into(), Value::String(self.doc_type.clone()));
        for (name, value) in &self.fields {
            members.insert(name.clone(), value.clone());
        }
        Value::Object(members)
    }
}
