//! Cached client for the upstream game metadata API.
//!
//! Every request is keyed on `upstream:<endpoint>:<normalized query>`. A hit
//! in the TTL cache skips authentication, rate limiting and the network
//! entirely. Misses go out with the cached bearer token; non-empty successful
//! results are stored, empty ones are not. Failures degrade to an empty
//! result so catalog views render nothing extra instead of erroring. Only
//! missing credentials are reported back to the caller.

use crate::cache::TtlCache;
use crate::upstream::UpstreamError;
use crate::upstream::json::{decode_value, parse_json_with_context};
use crate::upstream::token::TokenCache;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use url::Url;

/// How long successful results stay cached unless the caller says otherwise.
pub const DEFAULT_REQUEST_TTL: Duration = Duration::from_secs(60 * 60);

/// Outbound requests per second allowed by the upstream provider.
pub const DEFAULT_RATE_LIMIT: NonZeroU32 = NonZeroU32::new(4).unwrap();

/// Requests slower than this are logged at warn level.
const SLOW_REQUEST: Duration = Duration::from_secs(2);

/// Cached upstream responses: the raw JSON array of records.
pub type RecordCache = TtlCache<Arc<Value>>;

/// Build the cache key for an upstream request.
pub fn cache_key(endpoint: &str, query: &str) -> String {
    format!("upstream:{endpoint}:{}", normalize_query(query))
}

/// Collapse all whitespace runs to a single space and trim the ends.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct UpstreamApi {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<TokenCache>,
    cache: RecordCache,
    limiter: DefaultDirectRateLimiter,
    default_ttl: Duration,
}

impl UpstreamApi {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        tokens: Arc<TokenCache>,
        cache: RecordCache,
    ) -> Result<Self, UpstreamError> {
        let mut base_url = Url::parse(base_url)?;
        // `Url::join` replaces the last segment unless the base ends in '/'.
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        Ok(Self {
            http,
            base_url,
            tokens,
            cache,
            limiter: RateLimiter::direct(Quota::per_second(DEFAULT_RATE_LIMIT)),
            default_ttl: DEFAULT_REQUEST_TTL,
        })
    }

    pub fn with_rate_limit(mut self, per_second: NonZeroU32) -> Self {
        self.limiter = RateLimiter::direct(Quota::per_second(per_second));
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    /// Query `endpoint`, caching non-empty results for the default TTL.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &str,
    ) -> Result<Vec<T>, UpstreamError> {
        self.request_with_ttl(endpoint, query, self.default_ttl)
            .await
    }

    /// Query `endpoint`, caching non-empty results for `ttl`.
    ///
    /// Returns an empty vector on any upstream failure. The only error
    /// returned is a configuration error from the token cache.
    pub async fn request_with_ttl<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &str,
        ttl: Duration,
    ) -> Result<Vec<T>, UpstreamError> {
        let key = cache_key(endpoint, query);

        if let Some(records) = self.cache.get(&key) {
            debug!(endpoint, "upstream cache hit");
            return Ok(decode_or_empty(endpoint, &records));
        }

        let records = match self.fetch(endpoint, query).await {
            Ok(records) => records,
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) => {
                warn!(endpoint, error = %e, "Upstream request failed, returning empty result");
                return Ok(Vec::new());
            }
        };

        if records.as_array().is_none_or(Vec::is_empty) {
            debug!(endpoint, "upstream returned no records, not caching");
            return Ok(Vec::new());
        }

        let typed = match decode_value(&records) {
            Ok(typed) => typed,
            Err(source) => {
                let e = UpstreamError::ParseFailed {
                    endpoint: endpoint.to_owned(),
                    source,
                };
                warn!(endpoint, error = ?e, "Upstream records did not match the expected shape");
                return Ok(Vec::new());
            }
        };

        self.cache.set_with_ttl(key, Arc::new(records), ttl);
        trace!(endpoint, ttl_secs = ttl.as_secs(), "upstream result cached");
        Ok(typed)
    }

    /// Drop the cached result for one request.
    pub fn invalidate(&self, endpoint: &str, query: &str) {
        self.cache.delete(&cache_key(endpoint, query));
    }

    async fn fetch(&self, endpoint: &str, query: &str) -> Result<Value, UpstreamError> {
        let credential = self.tokens.access_token().await?;
        let url = self.base_url.join(endpoint.trim_start_matches('/'))?;

        self.limiter.until_ready().await;

        let start = Instant::now();
        let response = self
            .http
            .post(url)
            .header("Client-ID", self.tokens.client_id().unwrap_or_default())
            .bearer_auth(&credential.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .body(query.to_owned())
            .send()
            .await?;

        let elapsed = start.elapsed();
        if elapsed > SLOW_REQUEST {
            warn!(endpoint, elapsed = ?elapsed, "slow upstream request");
        }

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                endpoint: endpoint.to_owned(),
            });
        }

        let body = response.text().await?;
        let records: Vec<Value> =
            parse_json_with_context(&body).map_err(|source| UpstreamError::ParseFailed {
                endpoint: endpoint.to_owned(),
                source,
            })?;
        Ok(Value::Array(records))
    }
}

fn decode_or_empty<T: DeserializeOwned>(endpoint: &str, records: &Value) -> Vec<T> {
    decode_value(records).unwrap_or_else(|e| {
        warn!(endpoint, error = ?e, "Cached records did not match the requested type");
        Vec::new()
    })
}
