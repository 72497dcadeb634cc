//! Two-tier cache for user-scoped aggregates.
//!
//! ## Tiers
//!
//! - **Session**: always written, checked first. Lives as long as the process.
//! - **Durable**: written only when the caller opts in. Survives restarts.
//!
//! ```text
//! get → session ─hit──────────────────────┐
//!          │ miss                          ├─→ window check → data | evict
//!          └→ durable ─hit→ promote to session
//! ```
//!
//! Every entry is stored as `{"data": <T>, "timestamp": <epoch ms>}` and is
//! valid while `now - timestamp < window`. Storage failures never reach the
//! caller: reads degrade to a miss and writes to a no-op followed by an
//! expiry sweep. The `try_*` variants expose the underlying `StorageError`.

use crate::cache::keys::APP_KEY_PATTERNS;
use crate::cache::store::{KeyValueStore, StorageError};
use crate::clock::{Clock, duration_millis};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default validity window for persisted entries.
pub const CACHE_DURATION: Duration = Duration::from_secs(5 * 60);

#[derive(Serialize)]
struct EntryRef<'a, T> {
    data: &'a T,
    timestamp: i64,
}

#[derive(Deserialize)]
struct Entry<T> {
    data: T,
    timestamp: i64,
}

/// Just the timestamp; lets sweeps validate entries without knowing `T`.
#[derive(Deserialize)]
struct Stamp {
    timestamp: i64,
}

pub struct CacheManager {
    session: Arc<dyn KeyValueStore>,
    durable: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl CacheManager {
    pub fn new(
        session: Arc<dyn KeyValueStore>,
        durable: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            session,
            durable,
            clock,
            window: CACHE_DURATION,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn session_tier(&self) -> &Arc<dyn KeyValueStore> {
        &self.session
    }

    pub fn durable_tier(&self) -> &Arc<dyn KeyValueStore> {
        &self.durable
    }

    fn tiers(&self) -> [(&'static str, &dyn KeyValueStore); 2] {
        [("session", &*self.session), ("durable", &*self.durable)]
    }

    fn is_fresh(&self, timestamp: i64, now: i64) -> bool {
        now.saturating_sub(timestamp) < duration_millis(self.window)
    }

    /// Store `data` in the session tier, and in the durable tier if `use_durable`.
    ///
    /// On failure the error is logged and an expiry sweep runs to free space.
    pub fn set<T: Serialize>(&self, key: &str, data: &T, use_durable: bool) {
        if let Err(e) = self.try_set(key, data, use_durable) {
            warn!(key, error = %e, "Failed to write persistent cache entry");
            let removed = self.clear_old_entries();
            debug!(removed, "Swept expired entries after failed write");
        }
    }

    pub fn try_set<T: Serialize>(
        &self,
        key: &str,
        data: &T,
        use_durable: bool,
    ) -> Result<(), StorageError> {
        let blob = serde_json::to_string(&EntryRef {
            data,
            timestamp: self.clock.now_millis(),
        })?;
        self.session.set(key, &blob)?;
        if use_durable {
            self.durable.set(key, &blob)?;
        }
        debug!(key, use_durable, bytes = blob.len(), "persistent cache set");
        Ok(())
    }

    /// Fetch a live entry, promoting durable-tier hits into the session tier.
    ///
    /// Expired or unreadable entries are removed from both tiers.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read persistent cache entry");
                None
            }
        }
    }

    pub fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let raw = match self.session.get(key)? {
            Some(raw) => raw,
            None => match self.durable.get(key)? {
                Some(raw) => {
                    if let Err(e) = self.session.set(key, &raw) {
                        warn!(key, error = %e, "Failed to promote durable entry");
                    } else {
                        debug!(key, "persistent cache hit (durable), promoted");
                    }
                    raw
                }
                None => return Ok(None),
            },
        };

        match serde_json::from_str::<Entry<T>>(&raw) {
            Ok(entry) if self.is_fresh(entry.timestamp, self.clock.now_millis()) => {
                Ok(Some(entry.data))
            }
            Ok(_) => {
                debug!(key, "persistent cache entry expired");
                self.remove_from_tiers(key)?;
                Ok(None)
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding malformed persistent cache entry");
                self.remove_from_tiers(key)?;
                Ok(None)
            }
        }
    }

    fn remove_from_tiers(&self, key: &str) -> Result<(), StorageError> {
        let session = self.session.remove(key);
        let durable = self.durable.remove(key);
        session.and(durable)
    }

    /// Delete `key` from both tiers.
    pub fn remove(&self, key: &str) {
        if let Err(e) = self.remove_from_tiers(key) {
            warn!(key, error = %e, "Failed to remove persistent cache entry");
        }
    }

    /// Delete every key containing `pattern`. Returns the number of distinct keys removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let removed = self.sweep(|key, _| key.contains(pattern), false);
        if removed > 0 {
            debug!(pattern, removed, "persistent cache pattern invalidated");
        }
        removed
    }

    /// Delete every expired or malformed entry. Returns the number of distinct keys removed.
    pub fn clear_old_entries(&self) -> usize {
        let now = self.clock.now_millis();
        self.sweep(
            |_, raw| match raw.and_then(|raw| serde_json::from_str::<Stamp>(raw).ok()) {
                Some(stamp) => !self.is_fresh(stamp.timestamp, now),
                None => true,
            },
            true,
        )
    }

    /// Remove every application-owned entry. Called on logout.
    pub fn clear_all(&self) {
        let removed: usize = APP_KEY_PATTERNS
            .iter()
            .map(|pattern| self.invalidate_pattern(pattern))
            .sum();
        info!(removed, "Cleared persistent cache");
    }

    /// Remove keys matching `should_remove(key, value)` from both tiers.
    ///
    /// Values are only loaded when `with_values` is set. A tier that fails to
    /// list its keys is skipped.
    fn sweep(
        &self,
        should_remove: impl Fn(&str, Option<&str>) -> bool,
        with_values: bool,
    ) -> usize {
        let mut removed = BTreeSet::new();
        for (name, tier) in self.tiers() {
            let keys = match tier.keys() {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(tier = name, error = %e, "Failed to list cache keys");
                    continue;
                }
            };
            for key in keys {
                let value = if with_values {
                    tier.get(&key).ok().flatten()
                } else {
                    None
                };
                if !should_remove(&key, value.as_deref()) {
                    continue;
                }
                match tier.remove(&key) {
                    Ok(()) => {
                        removed.insert(key);
                    }
                    Err(e) => warn!(tier = name, key, error = %e, "Failed to remove cache key"),
                }
            }
        }
        removed.len()
    }
}
