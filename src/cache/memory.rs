//! Process-local TTL cache.
//!
//! Entries carry an absolute expiry and are evicted lazily: [`TtlCache::get`]
//! removes a stale entry when it finds one, and [`TtlCache::cleanup_expired`]
//! sweeps on demand. There is no background timer. `get` is therefore the one
//! read-like operation with a write side effect; use [`TtlCache::peek`] when a
//! read must not mutate the map.

use crate::clock::{Clock, duration_millis};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Default lifetime for entries stored with [`TtlCache::set`].
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// A cached value and the epoch-millisecond instant it stops being served.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub data: V,
    pub expiry: i64,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: i64) -> bool {
        now < self.expiry
    }
}

/// Shared TTL cache. Clone-cheap; clones share the same map.
#[derive(Clone)]
pub struct TtlCache<V> {
    entries: Arc<DashMap<String, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_default_ttl(clock, DEFAULT_TTL)
    }

    pub fn with_default_ttl(clock: Arc<dyn Clock>, default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
            default_ttl,
        }
    }

    /// Return the value for `key` if it is still live.
    ///
    /// A stale entry found here is removed before returning `None`.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_millis();
        let entry = self.entries.get(key)?;
        if entry.is_live(now) {
            return Some(entry.data.clone());
        }
        // The read guard must be released before removing from the same shard.
        drop(entry);
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        trace!(key, "ttl cache entry expired");
        None
    }

    /// Like [`get`](Self::get) but never evicts.
    pub fn peek(&self, key: &str) -> Option<V> {
        let now = self.clock.now_millis();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.data.clone())
    }

    /// Store `data` under `key` with the cache's default TTL.
    pub fn set(&self, key: impl Into<String>, data: V) {
        self.set_with_ttl(key, data, self.default_ttl);
    }

    /// Store `data` under `key`, replacing any previous entry.
    pub fn set_with_ttl(&self, key: impl Into<String>, data: V, ttl: Duration) {
        let expiry = self.clock.now_millis().saturating_add(duration_millis(ttl));
        self.entries.insert(key.into(), CacheEntry { data, expiry });
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, including stale ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }
}
