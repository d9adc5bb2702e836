//! View and full-text query types.

use crate::document::{Document, DocumentId};
use serde_json::{Map, Value};

/// A request against a named map view.
#[derive(Debug, Clone)]
pub struct ViewQuery {
    /// Design document name.
    pub design: String,
    /// View name within the design document.
    pub view: String,
    /// Exact key to match.
    pub key: Option<Value>,
    /// Inclusive lower key bound.
    pub start_key: Option<Value>,
    /// Inclusive upper key bound.
    pub end_key: Option<Value>,
    /// Reverse the key order.
    pub descending: bool,
    /// Number of rows to skip.
    pub skip: u64,
    /// Maximum number of rows to return.
    pub limit: Option<u64>,
    /// Embed the full document in each row.
    ///
    /// Required for entity-materializing queries.
    pub include_docs: bool,
}

impl ViewQuery {
    /// Creates a query against `design/view` with no filters.
    #[must_use]
    pub fn new(design: impl Into<String>, view: impl Into<String>) -> Self {
        Self {
            design: design.into(),
            view: view.into(),
            key: None,
            start_key: None,
            end_key: None,
            descending: false,
            skip: 0,
            limit: None,
            include_docs: false,
        }
    }

    /// Matches only rows with exactly this key.
    #[must_use]
    pub fn with_key(mut self, key: Value) -> Self {
        self.key = Some(key);
        self
    }

    /// Sets the inclusive lower key bound.
    #[must_use]
    pub fn with_start_key(mut self, key: Value) -> Self {
        self.start_key = Some(key);
        self
    }

    /// Sets the inclusive upper key bound.
    #[must_use]
    pub fn with_end_key(mut self, key: Value) -> Self {
        self.end_key = Some(key);
        self
    }

    /// Reverses the key order.
    #[must_use]
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Skips the first `skip` rows.
    #[must_use]
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// Caps the number of returned rows.
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Requests the full document embedded in each row.
    #[must_use]
    pub fn include_docs(mut self) -> Self {
        self.include_docs = true;
        self
    }
}

/// One row of a view result.
#[derive(Debug, Clone)]
pub struct ViewRow {
    /// The key the view emitted.
    pub key: Value,
    /// The value the view emitted.
    pub value: Value,
    /// Id of the document that produced the row.
    pub id: Option<DocumentId>,
    /// The full document, when the query requested embedded documents.
    pub doc: Option<Document>,
}

/// The rows and counts a view query produced.
#[derive(Debug, Clone, Default)]
pub struct ViewResult {
    /// Matching rows, in key order.
    pub rows: Vec<ViewRow>,
    /// Total number of matching rows, before skip and limit.
    pub total_rows: u64,
    /// Number of rows skipped.
    pub offset: u64,
}

/// A full-text search request against a named index.
#[derive(Debug, Clone)]
pub struct FullTextQuery {
    /// Index name.
    pub index: String,
    /// The search phrase.
    pub query: String,
    /// Number of rows to skip.
    pub skip: u64,
    /// Maximum number of rows to return.
    pub limit: Option<u64>,
    /// Embed the full document in each row.
    pub include_docs: bool,
}

impl FullTextQuery {
    /// Creates a full-text query against the given index.
    #[must_use]
    pub fn new(index: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            query: query.into(),
            skip: 0,
            limit: None,
            include_docs: false,
        }
    }

    /// Skips the first `skip` rows.
    #[must_use]
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// Caps the number of returned rows.
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Requests the full document embedded in each row.
    #[must_use]
    pub fn include_docs(mut self) -> Self {
        self.include_docs = true;
        self
    }
}

/// One row of a full-text result.
#[derive(Debug, Clone)]
pub struct FullTextRow {
    /// The stored fields of the matching document.
    pub fields: Map<String, Value>,
    /// Match score, higher is better.
    pub score: f32,
    /// Id of the matching document.
    pub id: Option<DocumentId>,
    /// The full document, when the query requested embedded documents.
    pub doc: Option<Document>,
}

/// The rows and counts a full-text query produced.
#[derive(Debug, Clone, Default)]
pub struct FullTextResult {
    /// Matching rows, best score first.
    pub rows: Vec<FullTextRow>,
    /// Total number of matching rows, before skip and limit.
    pub total_rows: u64,
    /// Number of rows skipped.
    pub offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn view_query_builder() {
        let query = ViewQuery::new("users", "by_name")
            .with_key(json!("Alice"))
            .with_skip(5)
            .with_limit(10)
            .include_docs();

        assert_eq!(query.design, "users");
        assert_eq!(query.view, "by_name");
        assert_eq!(query.key, Some(json!("Alice")));
        assert_eq!(query.skip, 5);
        assert_eq!(query.limit, Some(10));
        assert!(query.include_docs);
        assert!(!query.descending);
    }

    #[test]
    fn fulltext_query_builder() {
        let query = FullTextQuery::new("everything", "smith").with_limit(3);
        assert_eq!(query.index, "everything");
        assert_eq!(query.query, "smith");
        assert_eq!(query.limit, Some(3));
        assert!(!query.include_docs);
    }
}
