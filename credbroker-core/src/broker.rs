//! Access-token acquisition, caching and refresh.
//!
//! This module provides [`AccessTokenBroker`], which owns the bearer token of
//! one platform identity.
//!
//! # Resolution order
//!
//! 1. A pinned token (configured directly) is returned as-is; the store and
//!    the authority are never consulted.
//! 2. Otherwise the shared [`CredentialStore`] is read. A hit is returned
//!    without taking any lock.
//! 3. On a miss the broker's refresh lock is taken, the store re-read, and
//!    only if it is still empty a token is fetched from the authority and
//!    written back with a TTL of `expires_in - 1500` seconds.
//!
//! Concurrent callers that miss together queue on the lock and pick up the
//! token written by whichever of them fetched first, so the authority sees a
//! single request.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use credbroker_core::{AccessTokenBroker, HttpTransport, Identity, MemoryStore, Platform};
//!
//! let broker = AccessTokenBroker::builder(Platform::Work)
//!     .identity(Identity::new("corp-id", "corp-secret")?)
//!     .cache_prefix("crm")
//!     .store(Arc::new(MemoryStore::new()))
//!     .transport(Arc::new(HttpTransport::new()?))
//!     .build()?;
//!
//! let token = broker.access_token().await?;
//! ```

use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::classifier::{check_response, CommonError};
use crate::error::{BrokerError, Result};
use crate::model::{access_token_key, Identity, Platform};
use crate::store::{CredentialStore, Secret};
use crate::transport::Transport;

/// Seconds subtracted from the server-declared lifetime before caching.
///
/// The cache entry lapses well before the upstream token does, so a cached
/// token is never one the platform already considers expired.
pub const TOKEN_TTL_MARGIN_SECS: i64 = 1500;

/// Cache TTL for a credential the authority declared valid for `expires_in`
/// seconds.
///
/// Returns `None` when the lifetime does not exceed the safety margin; such a
/// credential is used but not cached.
pub fn cache_ttl(expires_in: i64) -> Option<Duration> {
    let secs = expires_in.saturating_sub(TOKEN_TTL_MARGIN_SECS);
    u64::try_from(secs)
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

/// A credential freshly issued by an authority.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub value: Secret,
    /// Server-declared lifetime in seconds.
    pub expires_in: i64,
}

/// Authority response for `/cgi-bin/token` and `/cgi-bin/gettoken`.
#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    #[serde(flatten)]
    common: CommonError,

    #[serde(default)]
    access_token: String,

    #[serde(default)]
    expires_in: i64,
}
crate::impl_error_shape!(AccessTokenResponse, nested common);

enum TokenSource {
    Pinned(Secret),
    Cached(Arc<dyn CredentialStore>),
}

/// Owns the access token of one platform identity.
///
/// Construct through [`AccessTokenBroker::builder`]. Share between tasks
/// with an `Arc`; every method takes `&self`.
pub struct AccessTokenBroker {
    platform: Platform,
    identity: Identity,
    api_base: String,
    cache_prefix: String,
    cache_key: String,
    source: TokenSource,
    transport: Arc<dyn Transport>,
    refresh_lock: Mutex<()>,
}

impl AccessTokenBroker {
    /// Start building a broker for `platform`.
    pub fn builder(platform: Platform) -> AccessTokenBrokerBuilder {
        AccessTokenBrokerBuilder::new(platform)
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Base URL of the platform API, without a trailing slash.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn cache_prefix(&self) -> &str {
        &self.cache_prefix
    }

    /// The store key the access token is cached under.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Whether the token was pinned at construction.
    pub fn is_pinned(&self) -> bool {
        matches!(self.source, TokenSource::Pinned(_))
    }

    /// The shared store, unless the token is pinned.
    pub fn store(&self) -> Option<&Arc<dyn CredentialStore>> {
        match &self.source {
            TokenSource::Pinned(_) => None,
            TokenSource::Cached(store) => Some(store),
        }
    }

    /// The transport used to reach the authority.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Return a usable access token.
    ///
    /// Cache hits never block. On a miss the caller may wait behind another
    /// caller's authority fetch and then return that caller's token.
    pub async fn access_token(&self) -> Result<Secret> {
        match &self.source {
            TokenSource::Pinned(token) => Ok(token.clone()),
            TokenSource::Cached(store) => {
                load_or_fetch(store.as_ref(), &self.cache_key, &self.refresh_lock, || {
                    self.fetch_from_authority()
                })
                .await
            }
        }
    }

    /// Fetch a new token from the authority regardless of the cache.
    ///
    /// Only call this with evidence that the cached token is stale, such as
    /// a `40001` response. A pinned token is returned unchanged.
    pub async fn refresh_access_token(&self) -> Result<Secret> {
        match &self.source {
            TokenSource::Pinned(token) => {
                tracing::warn!(
                    "Refresh requested for pinned {} token of {}; pinned tokens are never refreshed",
                    self.platform,
                    self.identity.app_id()
                );
                Ok(token.clone())
            }
            TokenSource::Cached(store) => {
                let _guard = self.refresh_lock.lock().await;
                tracing::info!(
                    "Refreshing {} access token for {}",
                    self.platform,
                    self.identity.app_id()
                );
                let issued = self.fetch_from_authority().await?;
                persist(store.as_ref(), &self.cache_key, &issued).await?;
                Ok(issued.value)
            }
        }
    }

    async fn fetch_from_authority(&self) -> Result<IssuedCredential> {
        let url = self.platform.token_url(&self.api_base, &self.identity);
        let body = self.transport.get(&url).await?;
        let response: AccessTokenResponse =
            serde_json::from_slice(&body).map_err(BrokerError::Decode)?;
        check_response(&response, self.platform.token_path(), &body)?;

        tracing::info!(
            "Fetched {} access token for {} (expires in {}s)",
            self.platform,
            self.identity.app_id(),
            response.expires_in
        );

        Ok(IssuedCredential {
            value: Secret::new(response.access_token),
            expires_in: response.expires_in,
        })
    }
}

impl std::fmt::Debug for AccessTokenBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenBroker")
            .field("platform", &self.platform)
            .field("app_id", &self.identity.app_id())
            .field("cache_key", &self.cache_key)
            .field("pinned", &self.is_pinned())
            .finish()
    }
}

/// Read `key` from `store`, or fetch and cache it with single-flight
/// semantics under `lock`.
pub(crate) async fn load_or_fetch<F, Fut>(
    store: &dyn CredentialStore,
    key: &str,
    lock: &Mutex<()>,
    fetch: F,
) -> Result<Secret>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<IssuedCredential>>,
{
    if let Some(hit) = store.get(key).await? {
        tracing::debug!("Cache hit for {}", key);
        return Ok(hit);
    }

    let _guard = lock.lock().await;

    // Another caller may have filled the cache while we waited.
    if let Some(hit) = store.get(key).await? {
        tracing::debug!("Cache filled for {} while waiting on refresh lock", key);
        return Ok(hit);
    }

    tracing::debug!("Cache miss for {}, fetching", key);
    let issued = fetch().await?;
    persist(store, key, &issued).await?;
    Ok(issued.value)
}

/// Write an issued credential with the margin-adjusted TTL.
pub(crate) async fn persist(
    store: &dyn CredentialStore,
    key: &str,
    issued: &IssuedCredential,
) -> Result<()> {
    match cache_ttl(issued.expires_in) {
        Some(ttl) => {
            store.set(key, &issued.value, ttl).await?;
            tracing::debug!("Cached {} for {}s", key, ttl.as_secs());
        }
        None => {
            tracing::warn!(
                "Lifetime of {}s for {} does not exceed the {}s safety margin; not caching",
                issued.expires_in,
                key,
                TOKEN_TTL_MARGIN_SECS
            );
        }
    }
    Ok(())
}

/// Builder for [`AccessTokenBroker`].
///
/// Every collaborator is injected; [`build`](Self::build) reports missing or
/// invalid pieces as [`BrokerError::Config`].
pub struct AccessTokenBrokerBuilder {
    platform: Platform,
    identity: Option<Identity>,
    cache_prefix: String,
    pinned: Option<Secret>,
    store: Option<Arc<dyn CredentialStore>>,
    transport: Option<Arc<dyn Transport>>,
    api_base: Option<String>,
}

impl AccessTokenBrokerBuilder {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            identity: None,
            cache_prefix: String::new(),
            pinned: None,
            store: None,
            transport: None,
            api_base: None,
        }
    }

    /// Set the identity presented to the authority. Required.
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Set the instance-scoped cache prefix. Required on the work platform.
    pub fn cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_prefix = prefix.into();
        self
    }

    /// Pin a token: it is returned unconditionally and never refreshed.
    pub fn pinned_token(mut self, token: impl Into<String>) -> Self {
        self.pinned = Some(Secret::new(token));
        self
    }

    /// Set the shared store. Required unless a token is pinned.
    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the transport used to reach the authority. Required.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override the platform's API base URL.
    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    pub fn build(self) -> Result<AccessTokenBroker> {
        let platform = self.platform;
        let identity = self.identity.ok_or_else(|| {
            BrokerError::config(format!("{} broker requires an identity", platform))
        })?;
        let transport = self.transport.ok_or_else(|| {
            BrokerError::config(format!("{} broker requires a transport", platform))
        })?;

        if platform.requires_cache_prefix() && self.cache_prefix.trim().is_empty() {
            return Err(BrokerError::config(format!(
                "{} broker requires a cache prefix",
                platform
            )));
        }

        let api_base = match self.api_base {
            Some(base) => {
                url::Url::parse(&base).map_err(|e| {
                    BrokerError::config(format!("invalid api base {:?}: {}", base, e))
                })?;
                base.trim_end_matches('/').to_string()
            }
            None => platform.default_api_base().to_string(),
        };

        let source = match (self.pinned.filter(|token| !token.is_empty()), self.store) {
            (Some(token), _) => TokenSource::Pinned(token),
            (None, Some(store)) => TokenSource::Cached(store),
            (None, None) => {
                return Err(BrokerError::config(format!(
                    "{} broker requires a credential store unless a token is pinned",
                    platform
                )));
            }
        };

        let cache_key = access_token_key(platform, &self.cache_prefix, identity.app_id());

        Ok(AccessTokenBroker {
            platform,
            identity,
            api_base,
            cache_prefix: self.cache_prefix,
            cache_key,
            source,
            transport,
            refresh_lock: Mutex::new(()),
        })
    }
}
