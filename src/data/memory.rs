//! In-memory [`DocumentStore`] used by tests and local tooling.
//!
//! The CLI seeds it from a JSON snapshot mapping document paths to fields.

use crate::data::{CollectionQuery, DataError, Direction, Document, DocumentStore, Fields};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    /// document path → fields
    docs: DashMap<String, Fields>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot of the form `{"users/u1/collection/7": {...}, ...}`.
    pub fn from_snapshot(json: &str) -> Result<Self, DataError> {
        let snapshot: HashMap<String, Fields> = serde_json::from_str(json)?;
        Ok(Self {
            docs: snapshot.into_iter().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// Id of `doc_path` if it sits directly under `collection_path`.
fn child_id<'a>(collection_path: &str, doc_path: &'a str) -> Option<&'a str> {
    let rest = doc_path.strip_prefix(collection_path)?.strip_prefix('/')?;
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}

/// Total order over optional JSON values: missing first, then by type.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document(&self, path: &str) -> Result<Option<Document>, DataError> {
        Ok(self.docs.get(path).map(|fields| Document {
            id: path.rsplit('/').next().unwrap_or(path).to_owned(),
            fields: fields.clone(),
        }))
    }

    async fn set_document(&self, path: &str, fields: Fields, merge: bool) -> Result<(), DataError> {
        if merge && let Some(mut existing) = self.docs.get_mut(path) {
            existing.extend(fields);
            return Ok(());
        }
        self.docs.insert(path.to_owned(), fields);
        Ok(())
    }

    async fn update_document(&self, path: &str, fields: Fields) -> Result<(), DataError> {
        let mut existing = self
            .docs
            .get_mut(path)
            .ok_or_else(|| DataError::NotFound(path.to_owned()))?;
        existing.extend(fields);
        Ok(())
    }

    async fn delete_document(&self, path: &str) -> Result<(), DataError> {
        self.docs.remove(path);
        Ok(())
    }

    async fn query_collection(
        &self,
        path: &str,
        query: &CollectionQuery,
    ) -> Result<Vec<Document>, DataError> {
        let mut docs: Vec<Document> = self
            .docs
            .iter()
            .filter_map(|entry| {
                let id = child_id(path, entry.key())?;
                let fields = entry.value();
                query
                    .filters
                    .iter()
                    .all(|f| fields.get(&f.field) == Some(&f.value))
                    .then(|| Document {
                        id: id.to_owned(),
                        fields: fields.clone(),
                    })
            })
            .collect();

        // Ids break ties so paging is stable.
        docs.sort_by(|a, b| {
            let by_field = match &query.order_by {
                Some((field, direction)) => {
                    let ord = compare_values(a.fields.get(field), b.fields.get(field));
                    match direction {
                        Direction::Ascending => ord,
                        Direction::Descending => ord.reverse(),
                    }
                }
                None => Ordering::Equal,
            };
            by_field.then_with(|| a.id.cmp(&b.id))
        });

        if let Some(cursor) = &query.start_after
            && let Some(pos) = docs.iter().position(|d| &d.id == cursor)
        {
            docs.drain(..=pos);
        }
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }
}
