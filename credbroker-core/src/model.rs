//! Domain model types for credbroker.
//!
//! This module defines:
//! - [`Identity`] - the `(app id, secret)` pair presented to the authority
//! - [`Platform`] - which upstream platform a broker talks to
//! - cache key layout helpers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::classifier::CREDENTIAL_EXPIRED;
use crate::error::{BrokerError, Result};
use crate::store::Secret;

/// The calling application's identity at the authority.
///
/// For the mini-program platform this is `(appid, secret)`, for the work
/// platform `(corpid, corpsecret)`. Both halves must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    app_id: String,
    secret: Secret,
}

impl Identity {
    /// Create a new identity, rejecting empty values.
    ///
    /// # Examples
    ///
    /// ```
    /// use credbroker_core::Identity;
    ///
    /// let identity = Identity::new("wx1234", "s3cret").unwrap();
    /// assert_eq!(identity.app_id(), "wx1234");
    /// assert!(Identity::new("", "s3cret").is_err());
    /// ```
    pub fn new(app_id: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let app_id = app_id.into();
        let secret = secret.into();
        if app_id.trim().is_empty() || secret.trim().is_empty() {
            return Err(BrokerError::config("app id and secret must both be set"));
        }
        Ok(Self {
            app_id,
            secret: Secret::new(secret),
        })
    }

    /// The public half of the identity.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The secret half of the identity.
    pub fn secret(&self) -> &Secret {
        &self.secret
    }
}

/// An upstream platform that issues access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Mini-program backend (`api.weixin.qq.com`).
    MiniProgram,

    /// Enterprise directory backend (`qyapi.weixin.qq.com`).
    Work,
}

impl Platform {
    /// Short name used in config sections and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MiniProgram => "miniprogram",
            Self::Work => "work",
        }
    }

    /// Namespace prepended to every cache key written for this platform.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::MiniProgram => "wechat:miniprogram",
            Self::Work => "wechat:work",
        }
    }

    /// Base URL used when the configuration does not override it.
    pub fn default_api_base(&self) -> &'static str {
        match self {
            Self::MiniProgram => "https://api.weixin.qq.com",
            Self::Work => "https://qyapi.weixin.qq.com",
        }
    }

    /// The work platform shares caches between many corp apps, so it
    /// insists on an explicit cache prefix.
    pub fn requires_cache_prefix(&self) -> bool {
        matches!(self, Self::Work)
    }

    /// Path of the authority endpoint that issues access tokens.
    pub fn token_path(&self) -> &'static str {
        match self {
            Self::MiniProgram => "/cgi-bin/token",
            Self::Work => "/cgi-bin/gettoken",
        }
    }

    /// Full authority URL for `identity`.
    pub fn token_url(&self, api_base: &str, identity: &Identity) -> String {
        let base = api_base.trim_end_matches('/');
        let app_id = query_escape(identity.app_id());
        let secret = query_escape(identity.secret().expose());
        match self {
            Self::MiniProgram => format!(
                "{}{}?grant_type=client_credential&appid={}&secret={}",
                base,
                self.token_path(),
                app_id,
                secret
            ),
            Self::Work => format!(
                "{}{}?corpid={}&corpsecret={}",
                base,
                self.token_path(),
                app_id,
                secret
            ),
        }
    }

    /// Error code the platform returns for an expired or invalid token.
    pub fn credential_expired_code(&self) -> i64 {
        CREDENTIAL_EXPIRED
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mini" | "miniprogram" | "mini-program" => Ok(Self::MiniProgram),
            "work" | "wecom" => Ok(Self::Work),
            other => Err(BrokerError::config(format!("unknown platform: {}", other))),
        }
    }
}

/// Cache key of the access token for `app_id`.
///
/// Layout: `<namespace>:<cache prefix>:<app id>`. An empty prefix leaves an
/// empty segment so keys stay compatible with existing deployments.
pub fn access_token_key(platform: Platform, cache_prefix: &str, app_id: &str) -> String {
    format!("{}:{}:{}", platform.namespace(), cache_prefix, app_id)
}

/// Cache key of the jsapi ticket for `app_id`.
pub fn ticket_key(platform: Platform, cache_prefix: &str, app_id: &str) -> String {
    format!("{}:{}:ticket:{}", platform.namespace(), cache_prefix, app_id)
}

/// Percent-encode a query parameter value.
pub(crate) fn query_escape(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
