//! Per-user game collection and the cached aggregates derived from it.
//!
//! Reads go through [`CacheManager`]: the raw collection lives in the session
//! tier only, while stats, lists and reviews are also persisted. Every
//! mutation writes the store first, then removes the exact cache keys it made
//! stale.

use crate::cache::{CacheManager, keys};
use crate::clock::Clock;
use crate::data::{CollectionQuery, DataError, Direction, Document, DocumentStore, Fields};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayStatus {
    Playing,
    Completed,
    Backlog,
    Wishlist,
    Dropped,
}

impl PlayStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlayStatus::Playing => "playing",
            PlayStatus::Completed => "completed",
            PlayStatus::Backlog => "backlog",
            PlayStatus::Wishlist => "wishlist",
            PlayStatus::Dropped => "dropped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionEntry {
    pub game_id: u64,
    pub name: String,
    pub status: PlayStatus,
    /// 1-10, unset until the user rates the game.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default)]
    pub hours_played: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub added_at: DateTime<Utc>,
}

/// Partial update applied by [`CollectionService::update_game`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PlayStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours_played: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub total: usize,
    /// Most recently added first.
    pub entries: Vec<CollectionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_games: usize,
    pub by_status: BTreeMap<String, usize>,
    pub completed: usize,
    pub average_rating: Option<f64>,
    pub total_hours: f64,
}

impl UserStats {
    fn from_entries(entries: &[CollectionEntry]) -> Self {
        let mut by_status = BTreeMap::new();
        for entry in entries {
            let status = entry.status.as_str().to_owned();
            *by_status.entry(status).or_insert(0) += 1;
        }
        let completed = entries
            .iter()
            .filter(|e| e.status == PlayStatus::Completed)
            .count();
        let ratings: Vec<f64> = entries
            .iter()
            .filter_map(|e| e.rating.map(f64::from))
            .collect();
        let average_rating = if ratings.is_empty() {
            None
        } else {
            Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
        };

        Self {
            total_games: entries.len(),
            by_status,
            completed,
            average_rating,
            total_hours: entries.iter().map(|e| e.hours_played).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameList {
    pub id: String,
    pub name: String,
    pub game_ids: Vec<u64>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// One review per game; saving again replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub game_id: u64,
    /// 1-10.
    pub rating: u8,
    #[serde(default)]
    pub body: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

fn collection_path(uid: &str) -> String {
    format!("users/{uid}/collection")
}

fn lists_path(uid: &str) -> String {
    format!("users/{uid}/lists")
}

fn reviews_path(uid: &str) -> String {
    format!("users/{uid}/reviews")
}

/// Serialize a record into top-level document fields.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields, DataError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => {
            let kind = json_kind(&other);
            Err(DataError::Backend(format!("expected a JSON object, got {kind}")))
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Decode documents, skipping any that no longer match the record shape.
fn decode_documents<T: DeserializeOwned>(path: &str, docs: Vec<Document>) -> Vec<T> {
    let mut records = Vec::with_capacity(docs.len());
    for doc in docs {
        match serde_json::from_value(Value::Object(doc.fields)) {
            Ok(record) => records.push(record),
            Err(e) => warn!(path, id = %doc.id, error = %e, "Skipping undecodable document"),
        }
    }
    records
}

pub struct CollectionService {
    store: Arc<dyn DocumentStore>,
    cache: Arc<CacheManager>,
    clock: Arc<dyn Clock>,
}

impl CollectionService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<CacheManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.clock.now_millis()).unwrap_or_default()
    }

    async fn load_entries(&self, uid: &str) -> Result<Vec<CollectionEntry>, DataError> {
        let path = collection_path(uid);
        let query = CollectionQuery::new().order_by("addedAt", Direction::Descending);
        let docs = self.store.query_collection(&path, &query).await?;
        Ok(decode_documents(&path, docs))
    }

    /// The user's full collection. Cached for the session only.
    pub async fn collection(&self, uid: &str) -> Result<CollectionSummary, DataError> {
        let key = keys::collection(uid);
        if let Some(cached) = self.cache.get::<CollectionSummary>(&key) {
            debug!(uid, "collection cache hit");
            return Ok(cached);
        }

        let entries = self.load_entries(uid).await?;
        let summary = CollectionSummary {
            total: entries.len(),
            entries,
        };
        self.cache.set(&key, &summary, false);
        Ok(summary)
    }

    /// Aggregate stats over the collection. Persisted across restarts.
    pub async fn stats(&self, uid: &str) -> Result<UserStats, DataError> {
        let key = keys::stats(uid);
        if let Some(cached) = self.cache.get::<UserStats>(&key) {
            debug!(uid, "stats cache hit");
            return Ok(cached);
        }

        let stats = UserStats::from_entries(&self.load_entries(uid).await?);
        self.cache.set(&key, &stats, true);
        Ok(stats)
    }

    /// The user's custom lists, oldest first. Persisted across restarts.
    pub async fn lists(&self, uid: &str) -> Result<Vec<GameList>, DataError> {
        let key = keys::lists(uid);
        if let Some(cached) = self.cache.get::<Vec<GameList>>(&key) {
            debug!(uid, "lists cache hit");
            return Ok(cached);
        }

        let path = lists_path(uid);
        let query = CollectionQuery::new().order_by("createdAt", Direction::Ascending);
        let docs = self.store.query_collection(&path, &query).await?;
        let lists: Vec<GameList> = decode_documents(&path, docs);
        self.cache.set(&key, &lists, true);
        Ok(lists)
    }

    /// The user's reviews, most recently updated first. Persisted across restarts.
    pub async fn reviews(&self, uid: &str) -> Result<Vec<Review>, DataError> {
        let key = keys::reviews(uid);
        if let Some(cached) = self.cache.get::<Vec<Review>>(&key) {
            debug!(uid, "reviews cache hit");
            return Ok(cached);
        }

        let path = reviews_path(uid);
        let query = CollectionQuery::new().order_by("updatedAt", Direction::Descending);
        let docs = self.store.query_collection(&path, &query).await?;
        let reviews: Vec<Review> = decode_documents(&path, docs);
        self.cache.set(&key, &reviews, true);
        Ok(reviews)
    }

    fn invalidate_collection(&self, uid: &str) {
        self.cache.remove(&keys::collection(uid));
        self.cache.remove(&keys::stats(uid));
    }

    pub async fn add_game(&self, uid: &str, entry: &CollectionEntry) -> Result<(), DataError> {
        let path = format!("{}/{}", collection_path(uid), entry.game_id);
        let fields = to_fields(entry)?;
        self.store.set_document(&path, fields, false).await?;
        self.invalidate_collection(uid);
        Ok(())
    }

    /// Apply a partial update. Fails with [`DataError::NotFound`] if the game
    /// is not in the collection.
    pub async fn update_game(
        &self,
        uid: &str,
        game_id: u64,
        update: &GameUpdate,
    ) -> Result<(), DataError> {
        let path = format!("{}/{game_id}", collection_path(uid));
        self.store.update_document(&path, to_fields(update)?).await?;
        self.invalidate_collection(uid);
        Ok(())
    }

    pub async fn remove_game(&self, uid: &str, game_id: u64) -> Result<(), DataError> {
        let path = format!("{}/{game_id}", collection_path(uid));
        self.store.delete_document(&path).await?;
        self.invalidate_collection(uid);
        Ok(())
    }

    pub async fn create_list(
        &self,
        uid: &str,
        name: &str,
        game_ids: Vec<u64>,
    ) -> Result<GameList, DataError> {
        let list = GameList {
            id: ulid::Ulid::new().to_string(),
            name: name.to_owned(),
            game_ids,
            created_at: self.now(),
        };
        let path = format!("{}/{}", lists_path(uid), list.id);
        let fields = to_fields(&list)?;
        self.store.set_document(&path, fields, false).await?;
        self.cache.remove(&keys::lists(uid));
        Ok(list)
    }

    pub async fn delete_list(&self, uid: &str, list_id: &str) -> Result<(), DataError> {
        let path = format!("{}/{list_id}", lists_path(uid));
        self.store.delete_document(&path).await?;
        self.cache.remove(&keys::lists(uid));
        Ok(())
    }

    /// Create or replace the user's review of `game_id`.
    pub async fn save_review(
        &self,
        uid: &str,
        game_id: u64,
        rating: u8,
        body: &str,
    ) -> Result<Review, DataError> {
        let review = Review {
            game_id,
            rating,
            body: body.to_owned(),
            updated_at: self.now(),
        };
        let path = format!("{}/{game_id}", reviews_path(uid));
        let fields = to_fields(&review)?;
        self.store.set_document(&path, fields, false).await?;
        self.cache.remove(&keys::reviews(uid));
        Ok(review)
    }

    pub async fn delete_review(&self, uid: &str, game_id: u64) -> Result<(), DataError> {
        let path = format!("{}/{game_id}", reviews_path(uid));
        self.store.delete_document(&path).await?;
        self.cache.remove(&keys::reviews(uid));
        Ok(())
    }
}
