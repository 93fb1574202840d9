//! Credential cache abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`CredentialStore`] - Trait for shared key/value caches with expiry
//! - [`MemoryStore`] - In-process implementation
//! - [`FileStore`] - JSON file implementation shared between processes
//!
//! # Storage Key Convention
//!
//! Keys follow the pattern: `wechat:{platform}:{cache prefix}:{app id}`, with
//! an extra `ticket:` segment before the app id for jsapi tickets. See
//! [`crate::model::access_token_key`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use credbroker_core::store::{Secret, CredentialStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//!
//! let secret = Secret::new("access-token");
//! store.set("wechat:work:crm:corp1", &secret, Duration::from_secs(5700)).await.unwrap();
//!
//! let retrieved = store.get("wechat:work:crm:corp1").await.unwrap();
//! assert_eq!(retrieved.unwrap().expose(), "access-token");
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is zeroed when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret holds an empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for credential store operations.
///
/// A missing key is not an error: [`CredentialStore::get`] returns
/// `Ok(None)` for it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No data directory could be determined for the default file location.
    #[error("data directory not available")]
    DataDirUnavailable,
}

/// A shared key/value cache with per-entry expiry.
///
/// A single store may back many brokers at once; keys are namespaced per
/// platform, cache prefix and app id. Implementations must make `set`
/// atomic with respect to concurrent readers.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist or has expired.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a value that expires after `ttl`.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, value: &Secret, ttl: Duration) -> Result<(), StoreError>;

    /// Check if a live key exists without retrieving the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}
