//! Construction-time configuration.
//!
//! These types deserialize from the `credbroker.toml` sections the CLI
//! reads, but any serde format works:
//!
//! ```toml
//! log_level = "info"
//!
//! [miniprogram]
//! app_id = "wx1234567890"
//! app_secret = "..."
//!
//! [work]
//! app_id = "ww0987654321"
//! app_secret = "..."
//! cache_prefix = "crm"
//! debug = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BrokerError, Result};
use crate::invoker::DEFAULT_MAX_REFRESHES;
use crate::model::{Identity, Platform};
use crate::store::Secret;
use crate::transport::DEFAULT_TIMEOUT;

/// Settings for one platform identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// App id (mini-program) or corp id (work).
    pub app_id: String,

    /// App secret or corp secret.
    pub app_secret: Secret,

    /// Instance-scoped cache prefix. Required for the work platform.
    #[serde(default)]
    pub cache_prefix: String,

    /// A pinned access token that bypasses the cache and the authority.
    #[serde(default)]
    pub access_token: Option<Secret>,

    /// Override of the platform API base URL.
    #[serde(default)]
    pub api_base: Option<String>,

    /// Log outbound URIs and raw responses.
    #[serde(default)]
    pub debug: bool,

    /// Transport timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Token refreshes allowed per call.
    #[serde(default = "default_max_refreshes")]
    pub max_refreshes: u32,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_max_refreshes() -> u32 {
    DEFAULT_MAX_REFRESHES
}

impl PlatformConfig {
    /// Minimal configuration with defaults for everything but the identity.
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: Secret::new(app_secret),
            cache_prefix: String::new(),
            access_token: None,
            api_base: None,
            debug: false,
            timeout_secs: default_timeout_secs(),
            max_refreshes: default_max_refreshes(),
        }
    }

    pub fn with_cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_prefix = prefix.into();
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(Secret::new(token));
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    /// Validated identity.
    pub fn identity(&self) -> Result<Identity> {
        Identity::new(self.app_id.clone(), self.app_secret.expose())
    }

    /// Transport timeout.
    pub fn timeout(&self) -> Result<Duration> {
        if self.timeout_secs == 0 {
            return Err(BrokerError::config("timeout_secs must be greater than zero"));
        }
        Ok(Duration::from_secs(self.timeout_secs))
    }
}

/// Whole-application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Logging level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Token cache file. Defaults to the platform data directory.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,

    #[serde(default)]
    pub miniprogram: Option<PlatformConfig>,

    #[serde(default)]
    pub work: Option<PlatformConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            cache_path: None,
            miniprogram: None,
            work: None,
        }
    }
}

impl ClientConfig {
    /// Settings for `platform`, if configured.
    pub fn platform(&self, platform: Platform) -> Option<&PlatformConfig> {
        match platform {
            Platform::MiniProgram => self.miniprogram.as_ref(),
            Platform::Work => self.work.as_ref(),
        }
    }

    /// Settings for `platform`, or a configuration error naming the missing
    /// section.
    pub fn require(&self, platform: Platform) -> Result<&PlatformConfig> {
        self.platform(platform).ok_or_else(|| {
            BrokerError::config(format!("no [{}] section configured", platform.as_str()))
        })
    }
}
