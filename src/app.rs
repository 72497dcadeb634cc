use crate::cache::{CacheManager, FileStore, MemoryStore, TtlCache};
use crate::cli::{CacheCommand, Command, UserCommand};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::data::{CollectionService, InMemoryDocumentStore};
use crate::upstream::{TokenCache, UpstreamApi};
use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Main application struct wiring the cache layers to their backends.
pub struct App {
    upstream: UpstreamApi,
    cache: Arc<CacheManager>,
    collections: CollectionService,
}

impl App {
    /// Build every component from configuration and sweep stale persisted entries.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        let tokens = TokenCache::new(
            http.clone(),
            config.auth_url.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
            clock.clone(),
        )
        .with_safety_margin(config.token_safety_margin);

        let upstream = UpstreamApi::new(
            http,
            &config.upstream_base_url,
            Arc::new(tokens),
            TtlCache::new(clock.clone()),
        )
        .context("Invalid upstream base URL")?
        .with_rate_limit(config.upstream_rate_limit)
        .with_default_ttl(config.upstream_cache_ttl);

        let durable_path = config.durable_store_path();
        let durable = FileStore::open(&durable_path)
            .with_context(|| format!("Failed to open {}", durable_path.display()))?;
        let cache = CacheManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(durable),
            clock.clone(),
        )
        .with_window(config.persistent_cache_window);

        let removed = cache.clear_old_entries();
        info!(
            path = %durable_path.display(),
            removed,
            window_secs = config.persistent_cache_window.as_secs(),
            "persistent cache ready"
        );

        let cache = Arc::new(cache);
        let documents = match &config.documents_path {
            Some(path) => load_documents(path)?,
            None => InMemoryDocumentStore::new(),
        };
        let collections = CollectionService::new(Arc::new(documents), cache.clone(), clock);

        Ok(Self {
            upstream,
            cache,
            collections,
        })
    }

    pub fn collections(&self) -> &CollectionService {
        &self.collections
    }

    pub async fn run(self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Query {
                endpoint,
                query,
                ttl,
            } => {
                let records: Vec<Value> = match ttl {
                    Some(secs) => {
                        self.upstream
                            .request_with_ttl(&endpoint, &query, Duration::from_secs(secs))
                            .await?
                    }
                    None => self.upstream.request(&endpoint, &query).await?,
                };
                info!(%endpoint, count = records.len(), "query complete");
                print_json(&records)
            }
            Command::Cache(CacheCommand::Get { key }) => match self.cache.get::<Value>(&key) {
                Some(data) => print_json(&data),
                None => {
                    info!(%key, "no valid cache entry");
                    Ok(())
                }
            },
            Command::Cache(CacheCommand::Sweep) => {
                let removed = self.cache.clear_old_entries();
                info!(removed, "persistent cache swept");
                Ok(())
            }
            Command::Cache(CacheCommand::Invalidate { pattern }) => {
                let removed = self.cache.invalidate_pattern(&pattern);
                info!(%pattern, removed, "persistent cache invalidated");
                Ok(())
            }
            Command::Cache(CacheCommand::Clear) => {
                self.cache.clear_all();
                Ok(())
            }
            Command::User(UserCommand::Collection { uid }) => {
                print_json(&self.collections.collection(&uid).await?)
            }
            Command::User(UserCommand::Stats { uid }) => {
                print_json(&self.collections.stats(&uid).await?)
            }
            Command::User(UserCommand::Lists { uid }) => {
                print_json(&self.collections.lists(&uid).await?)
            }
            Command::User(UserCommand::Reviews { uid }) => {
                print_json(&self.collections.reviews(&uid).await?)
            }
        }
    }
}

fn load_documents(path: &Path) -> anyhow::Result<InMemoryDocumentStore> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let store = InMemoryDocumentStore::from_snapshot(&text)
        .with_context(|| format!("Invalid document snapshot {}", path.display()))?;
    info!(path = %path.display(), documents = store.len(), "document store seeded");
    Ok(store)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{out}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{KeyValueStore, keys};
    use figment::Figment;
    use figment::providers::Serialized;
    use serde_json::json;

    fn config(cache_dir: &Path, documents_path: Option<&Path>) -> Config {
        let mut figment = Figment::new().merge(Serialized::default("cache_dir", cache_dir));
        if let Some(path) = documents_path {
            figment = figment.merge(Serialized::default("documents_path", path));
        }
        figment.extract().unwrap()
    }

    #[tokio::test]
    async fn seeded_documents_back_the_user_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("documents.json");
        let snapshot = json!({
            "users/u1/collection/1942": {
                "gameId": 1942,
                "name": "The Witcher 3: Wild Hunt",
                "status": "completed",
                "rating": 9,
                "hoursPlayed": 80.0,
                "addedAt": 1_700_000_000_000_i64
            },
            "users/u1/collection/7346": {
                "gameId": 7346,
                "name": "The Legend of Zelda: Breath of the Wild",
                "status": "playing",
                "hoursPlayed": 12.5,
                "addedAt": 1_700_000_100_000_i64
            }
        });
        std::fs::write(&seed, snapshot.to_string()).unwrap();
        let config = config(&dir.path().join("cache"), Some(&seed));

        let app = App::new(&config).unwrap();
        let stats = app.collections().stats("u1").await.unwrap();
        assert_eq!(stats.total_games, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total_hours, 92.5);
        let collection = app.collections().collection("u1").await.unwrap();
        assert_eq!(collection.entries[0].game_id, 7346);
        drop(app);

        let durable = FileStore::open(config.durable_store_path()).unwrap();
        assert!(durable.get(&keys::stats("u1")).unwrap().is_some());
        assert!(durable.get(&keys::collection("u1")).unwrap().is_none());
    }

    #[tokio::test]
    async fn unseeded_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::new(&config(dir.path(), None)).unwrap();
        let collection = app.collections().collection("u1").await.unwrap();
        assert_eq!(collection.total, 0);
    }

    #[test]
    fn unreadable_snapshot_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(App::new(&config(dir.path(), Some(&missing))).is_err());
    }
}
