//! Client-credentials token cache for the upstream metadata API.
//!
//! Holds a single bearer credential and hands it out until shortly before it
//! expires. The stored expiry is pulled in by a safety margin so a token is
//! never used right at the edge of its lifetime.
//!
//! Concurrent misses are collapsed: the first caller refreshes while holding
//! the refresh lock, and the others re-check the slot once they acquire it.

use crate::clock::{Clock, duration_millis};
use crate::upstream::UpstreamError;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Subtracted from the declared token lifetime before caching.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// A bearer credential for the upstream API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub token_type: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default = "default_token_type")]
    token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_owned()
}

struct CachedToken {
    credential: Credential,
    expires_at: i64,
}

pub struct TokenCache {
    http: reqwest::Client,
    auth_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    safety_margin: Duration,
    clock: Arc<dyn Clock>,
    slot: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
}

impl TokenCache {
    pub fn new(
        http: reqwest::Client,
        auth_url: impl Into<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            auth_url: auth_url.into(),
            client_id: client_id.filter(|s| !s.is_empty()),
            client_secret: client_secret.filter(|s| !s.is_empty()),
            safety_margin: DEFAULT_SAFETY_MARGIN,
            clock,
            slot: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Return a valid credential, authenticating only when the cached one is
    /// missing or expired.
    pub async fn access_token(&self) -> Result<Credential, UpstreamError> {
        if let Some(credential) = self.cached().await {
            return Ok(credential);
        }

        let _guard = self.refresh.lock().await;
        if let Some(credential) = self.cached().await {
            debug!("Upstream token refreshed by a concurrent caller");
            return Ok(credential);
        }

        let client_id = self
            .client_id
            .as_deref()
            .ok_or(UpstreamError::MissingCredentials("client id"))?;
        let client_secret = self
            .client_secret
            .as_deref()
            .ok_or(UpstreamError::MissingCredentials("client secret"))?;

        let token = self.authenticate(client_id, client_secret).await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(self.safety_margin);
        let expires_at = self
            .clock
            .now_millis()
            .saturating_add(duration_millis(lifetime));

        let credential = Credential {
            access_token: token.access_token,
            token_type: token.token_type,
        };
        *self.slot.write().await = Some(CachedToken {
            credential: credential.clone(),
            expires_at,
        });

        info!(
            expires_in = token.expires_in,
            cached_for = lifetime.as_secs(),
            "Obtained upstream access token"
        );
        Ok(credential)
    }

    /// Drop the cached credential so the next call re-authenticates.
    pub async fn invalidate(&self) {
        if self.slot.write().await.take().is_some() {
            debug!("Upstream token invalidated");
        }
    }

    /// Alias of [`invalidate`](Self::invalidate) for test lifecycles.
    pub async fn reset(&self) {
        self.invalidate().await;
    }

    async fn cached(&self) -> Option<Credential> {
        let now = self.clock.now_millis();
        self.slot
            .read()
            .await
            .as_ref()
            .filter(|cached| now < cached.expires_at)
            .map(|cached| cached.credential.clone())
    }

    async fn authenticate(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenResponse, UpstreamError> {
        let response = self
            .http
            .post(&self.auth_url)
            .query(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Upstream authentication rejected");
            return Err(UpstreamError::AuthFailed {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        crate::upstream::json::parse_json_with_context(&body).map_err(|source| {
            UpstreamError::ParseFailed {
                endpoint: self.auth_url.clone(),
                source,
            }
        })
    }
}
