//! # credbroker core
//!
//! Access-token brokering for the mini-program and work platform APIs.
//!
//! This crate provides:
//! - [`AccessTokenBroker`] - acquires, caches and single-flight refreshes the
//!   bearer token for one platform identity
//! - [`Invoker`] - attaches the token to outbound calls, classifies the
//!   response and refreshes-and-retries when the platform reports an expired
//!   credential
//! - [`ErrorShape`] and [`classify`] - `errcode`/`errmsg` extraction from decoded
//!   responses
//! - [`CredentialStore`] with in-memory and file-backed implementations
//! - [`Transport`] with a `reqwest` based default
//! - [`PlatformClient`] - a ready-made composition of all of the above
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use credbroker_core::{MemoryStore, Platform, PlatformClient, PlatformConfig};
//!
//! async fn user_info(config: &PlatformConfig) -> credbroker_core::Result<serde_json::Value> {
//!     let store = Arc::new(MemoryStore::new());
//!     let client = PlatformClient::from_config(Platform::Work, config, Some(store))?;
//!     client
//!         .invoker()
//!         .get("https://qyapi.weixin.qq.com/cgi-bin/user/get?userid=zhangsan")
//!         .await
//! }
//! ```

pub mod broker;
pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod invoker;
pub mod model;
pub mod signature;
pub mod store;
pub mod transport;

// Re-export commonly used types at crate root
pub use model::{
    Identity,
    Platform,
};

pub use store::{
    Secret,
    CredentialStore,
    StoreError,
    MemoryStore,
    FileStore,
};

pub use transport::{
    HttpTransport,
    Transport,
    TransportError,
};

pub use classifier::{
    classify,
    Classified,
    CommonError,
    ErrorFields,
    ErrorShape,
    PlatformError,
    CREDENTIAL_EXPIRED,
};

pub use broker::{
    AccessTokenBroker,
    AccessTokenBrokerBuilder,
    TOKEN_TTL_MARGIN_SECS,
};

pub use invoker::{
    ApiRequest,
    Invoker,
    RequestBody,
    DEFAULT_MAX_REFRESHES,
};

pub use client::{
    Code2SessionResult,
    JsapiConfig,
    PlatformClient,
};

pub use config::{ClientConfig, PlatformConfig};

pub use signature::jsapi_signature;

pub use error::{BrokerError, Result};
