//! Per-user document store interface and the cached reads built on it.
//!
//! Paths are slash-separated: a collection path (`users/u1/collection`) names
//! a set of documents, and a document path appends one id segment
//! (`users/u1/collection/1942`).

pub mod collections;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

pub use collections::CollectionService;
pub use memory::InMemoryDocumentStore;

pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

/// Equality filter on a top-level field.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Default)]
pub struct CollectionQuery {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
    /// Id of the last document of the previous page.
    pub start_after: Option<String>,
}

impl CollectionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, id: impl Into<String>) -> Self {
        self.start_after = Some(id.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("failed to (de)serialize document")]
    Serialization(#[from] serde_json::Error),
    #[error("document store error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, path: &str) -> Result<Option<Document>, DataError>;

    /// Create or replace a document. With `merge`, existing fields not in
    /// `fields` are kept.
    async fn set_document(&self, path: &str, fields: Fields, merge: bool) -> Result<(), DataError>;

    /// Overwrite the given fields of an existing document.
    async fn update_document(&self, path: &str, fields: Fields) -> Result<(), DataError>;

    async fn delete_document(&self, path: &str) -> Result<(), DataError>;

    async fn query_collection(
        &self,
        path: &str,
        query: &CollectionQuery,
    ) -> Result<Vec<Document>, DataError>;
}
