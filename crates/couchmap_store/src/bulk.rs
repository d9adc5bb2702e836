//! Bulk-update batches.

use crate::document::{Document, DocumentId, Revision};

/// Identity returned by the store for a persisted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHead {
    /// The document id.
    pub id: DocumentId,
    /// The revision the store assigned.
    pub revision: Revision,
}

impl DocumentHead {
    /// Creates a document head.
    #[must_use]
    pub fn new(id: DocumentId, revision: Revision) -> Self {
        Self { id, revision }
    }
}

/// One recorded mutation in a bulk batch.
#[derive(Debug, Clone)]
pub enum BulkEntry {
    /// Create a new document. The document must carry no revision.
    Create {
        /// The document to create.
        document: Document,
    },
    /// Update an existing document. Its revision must be current.
    Update {
        /// The document to update.
        document: Document,
    },
    /// Delete a document at the given revision.
    Delete {
        /// The document id to delete.
        id: DocumentId,
        /// The revision to delete at.
        revision: Revision,
    },
}

impl BulkEntry {
    /// Returns the document id this entry targets.
    #[must_use]
    pub fn document_id(&self) -> &DocumentId {
        match self {
            BulkEntry::Create { document } | BulkEntry::Update { document } => document.id(),
            BulkEntry::Delete { id, .. } => id,
        }
    }
}

/// An ordered batch of mutations submitted in one bulk-update call.
///
/// The caller records create/update/delete entries against the batch and
/// hands it to [`DocumentStore::bulk_update`](crate::DocumentStore::bulk_update).
/// The store reports back a head for exactly the entries it accepted.
#[derive(Debug, Clone, Default)]
pub struct BulkBatch {
    entries: Vec<BulkEntry>,
}

impl BulkBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a document creation.
    pub fn create(&mut self, document: Document) -> &mut Self {
        self.entries.push(BulkEntry::Create { document });
        self
    }

    /// Records a document update.
    pub fn update(&mut self, document: Document) -> &mut Self {
        self.entries.push(BulkEntry::Update { document });
        self
    }

    /// Records a document deletion.
    pub fn delete(&mut self, id: DocumentId, revision: Revision) -> &mut Self {
        self.entries.push(BulkEntry::Delete { id, revision });
        self
    }

    /// Returns the recorded entries in submission order.
    #[must_use]
    pub fn entries(&self) -> &[BulkEntry] {
        &self.entries
    }

    /// Consumes the batch, returning the entries.
    #[must_use]
    pub fn into_entries(self) -> Vec<BulkEntry> {
        self.entries
    }

    /// Returns the number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
