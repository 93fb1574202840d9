//! Ready-made platform clients.
//!
//! [`PlatformClient`] is the outermost composition point: it wires an
//! [`AccessTokenBroker`] and an [`Invoker`] to a shared store and, unless one
//! is supplied, a default [`HttpTransport`]. Platform-specific operations
//! live in the submodules.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::broker::AccessTokenBroker;
use crate::config::PlatformConfig;
use crate::error::{BrokerError, Result};
use crate::invoker::Invoker;
use crate::model::Platform;
use crate::store::{CredentialStore, Secret};
use crate::transport::{HttpTransport, Transport};

mod miniprogram;
mod work;

pub use miniprogram::Code2SessionResult;
pub use work::{JsapiConfig, JsapiTicketResponse};

/// Broker plus invoker for one platform identity.
#[derive(Debug)]
pub struct PlatformClient {
    broker: Arc<AccessTokenBroker>,
    invoker: Invoker,
    ticket_lock: Mutex<()>,
}

impl PlatformClient {
    /// Compose a client from already-built parts.
    pub fn new(broker: Arc<AccessTokenBroker>, invoker: Invoker) -> Self {
        Self {
            broker,
            invoker,
            ticket_lock: Mutex::new(()),
        }
    }

    /// Build a client from configuration with the default HTTP transport.
    ///
    /// `store` may be `None` only when the configuration pins a token.
    pub fn from_config(
        platform: Platform,
        config: &PlatformConfig,
        store: Option<Arc<dyn CredentialStore>>,
    ) -> Result<Self> {
        let transport = HttpTransport::with_options(config.timeout()?, config.debug)?;
        Self::from_config_with_transport(platform, config, store, Arc::new(transport))
    }

    /// Build a client from configuration with an injected transport.
    pub fn from_config_with_transport(
        platform: Platform,
        config: &PlatformConfig,
        store: Option<Arc<dyn CredentialStore>>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let mut builder = AccessTokenBroker::builder(platform)
            .identity(config.identity()?)
            .cache_prefix(config.cache_prefix.clone())
            .transport(transport.clone());

        if let Some(token) = &config.access_token {
            builder = builder.pinned_token(token.expose());
        }
        if let Some(store) = store {
            builder = builder.store(store);
        }
        if let Some(api_base) = &config.api_base {
            builder = builder.api_base(api_base.clone());
        }

        let broker = Arc::new(builder.build()?);
        let invoker = Invoker::new(broker.clone(), transport).with_max_refreshes(config.max_refreshes);

        tracing::debug!(
            "Configured {} client for {} (cache key {})",
            platform,
            config.app_id,
            broker.cache_key()
        );

        Ok(Self::new(broker, invoker))
    }

    pub fn platform(&self) -> Platform {
        self.broker.platform()
    }

    pub fn broker(&self) -> &Arc<AccessTokenBroker> {
        &self.broker
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// See [`AccessTokenBroker::access_token`].
    pub async fn access_token(&self) -> Result<Secret> {
        self.broker.access_token().await
    }

    /// See [`AccessTokenBroker::refresh_access_token`].
    pub async fn refresh_access_token(&self) -> Result<Secret> {
        self.broker.refresh_access_token().await
    }

    /// Absolute URL for an API path on this client's platform.
    pub fn api_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.broker.api_base(),
            path.trim_start_matches('/')
        )
    }

    fn require_platform(&self, platform: Platform, operation: &'static str) -> Result<()> {
        if self.platform() == platform {
            Ok(())
        } else {
            Err(BrokerError::Unsupported {
                operation,
                platform: self.platform().as_str(),
            })
        }
    }
}
