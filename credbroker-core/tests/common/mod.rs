//! Shared stubs for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use credbroker_core::store::{CredentialStore, MemoryStore, Secret, StoreError};
use credbroker_core::transport::{Headers, Transport, TransportError};
use credbroker_core::{AccessTokenBroker, Identity, Invoker, Platform};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What the stub answers to a non-authority call.
#[derive(Debug, Clone)]
pub enum ApiReply {
    Body(String),
    Fail,
    Hang,
}

impl ApiReply {
    pub fn expired() -> Self {
        Self::Body(r#"{"errcode":40001,"errmsg":"invalid credential"}"#.to_string())
    }

    pub fn ok(json: &str) -> Self {
        Self::Body(json.to_string())
    }
}

/// Transport stub that plays both the authority and the platform API.
///
/// Authority calls (`/cgi-bin/token`, `/cgi-bin/gettoken`) answer with
/// `tok-<n>` where `n` counts authority calls from 1. Every other call pops
/// the next scripted reply, falling back to the last one once the script is
/// exhausted.
pub struct ScriptedTransport {
    lifetime: i64,
    authority_delay: Duration,
    authority_calls: AtomicUsize,
    api_calls: AtomicUsize,
    script: Mutex<VecDeque<ApiReply>>,
    fallback: Mutex<ApiReply>,
    api_uris: Mutex<Vec<String>>,
    api_bodies: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<ApiReply>) -> Self {
        let fallback = replies
            .last()
            .cloned()
            .unwrap_or_else(|| ApiReply::ok(r#"{"errcode":0,"errmsg":"ok"}"#));
        Self {
            lifetime: 7200,
            authority_delay: Duration::ZERO,
            authority_calls: AtomicUsize::new(0),
            api_calls: AtomicUsize::new(0),
            script: Mutex::new(replies.into()),
            fallback: Mutex::new(fallback),
            api_uris: Mutex::new(Vec::new()),
            api_bodies: Mutex::new(Vec::new()),
        }
    }

    /// Server-declared lifetime of issued tokens.
    pub fn with_lifetime(mut self, lifetime: i64) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Delay every authority response, widening the single-flight window.
    pub fn with_authority_delay(mut self, delay: Duration) -> Self {
        self.authority_delay = delay;
        self
    }

    pub fn authority_calls(&self) -> usize {
        self.authority_calls.load(Ordering::SeqCst)
    }

    pub fn api_calls(&self) -> usize {
        self.api_calls.load(Ordering::SeqCst)
    }

    pub fn api_uris(&self) -> Vec<String> {
        self.api_uris.lock().clone()
    }

    pub fn api_bodies(&self) -> Vec<Vec<u8>> {
        self.api_bodies.lock().clone()
    }

    fn is_authority(uri: &str) -> bool {
        uri.contains("/cgi-bin/token?") || uri.contains("/cgi-bin/gettoken?")
    }

    async fn authority(&self) -> Result<Vec<u8>, TransportError> {
        let n = self.authority_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.authority_delay.is_zero() {
            tokio::time::sleep(self.authority_delay).await;
        }
        Ok(format!(
            r#"{{"errcode":0,"errmsg":"ok","access_token":"tok-{}","expires_in":{}}}"#,
            n, self.lifetime
        )
        .into_bytes())
    }

    async fn api(&self, uri: &str, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        self.api_calls.fetch_add(1, Ordering::SeqCst);
        self.api_uris.lock().push(uri.to_string());
        self.api_bodies.lock().push(body);

        let reply = {
            let mut script = self.script.lock();
            script
                .pop_front()
                .unwrap_or_else(|| self.fallback.lock().clone())
        };

        match reply {
            ApiReply::Body(body) => Ok(body.into_bytes()),
            ApiReply::Fail => Err(TransportError::Request {
                uri: uri.to_string(),
                message: "connection reset".to_string(),
            }),
            ApiReply::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, uri: &str) -> Result<Vec<u8>, TransportError> {
        if Self::is_authority(uri) {
            self.authority().await
        } else {
            self.api(uri, Vec::new()).await
        }
    }

    async fn post(
        &self,
        uri: &str,
        body: &[u8],
        _headers: &Headers,
    ) -> Result<Vec<u8>, TransportError> {
        self.api(uri, body.to_vec()).await
    }

    async fn post_json(
        &self,
        uri: &str,
        params: &serde_json::Value,
    ) -> Result<Vec<u8>, TransportError> {
        self.api(uri, serde_json::to_vec(params)?).await
    }
}

/// [`MemoryStore`] wrapper that counts operations and can be made to fail.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    gets: AtomicUsize,
    sets: AtomicUsize,
    failing: bool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every operation fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing {
            Err(StoreError::BackendError {
                message: "cache unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CredentialStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &Secret, ttl: Duration) -> Result<(), StoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.set(key, value, ttl).await
    }
}

pub fn identity() -> Identity {
    Identity::new("wx-app", "wx-secret").unwrap()
}

/// Mini-program broker over `transport` and `store`.
pub fn broker(
    transport: Arc<ScriptedTransport>,
    store: Arc<dyn CredentialStore>,
) -> Arc<AccessTokenBroker> {
    Arc::new(
        AccessTokenBroker::builder(Platform::MiniProgram)
            .identity(identity())
            .store(store)
            .transport(transport)
            .build()
            .unwrap(),
    )
}

/// Invoker over a fresh broker sharing `transport`.
pub fn invoker(transport: Arc<ScriptedTransport>, store: Arc<dyn CredentialStore>) -> Invoker {
    Invoker::new(broker(transport.clone(), store), transport)
}
