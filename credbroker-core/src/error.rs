//! Top-level error type for credbroker.

use std::time::Duration;

use thiserror::Error;

use crate::classifier::PlatformError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Result alias used throughout the crate.
pub type Result<T, E = BrokerError> = std::result::Result<T, E>;

/// Every failure the broker or invoker can surface.
///
/// Errors cross the broker/invoker boundary unchanged so callers can tell
/// "could not even try" (transport, cache, configuration) apart from
/// "tried and the platform rejected it" ([`BrokerError::Platform`]).
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Network failure or non-2xx status. Never retried by the invoker.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The response body did not decode into the requested type.
    #[error("response could not be decoded: {0}")]
    Decode(#[source] serde_json::Error),

    /// The decode target exposes no `errcode`/`errmsg` pair.
    #[error("response type {type_name} does not expose errcode/errmsg")]
    Shape { type_name: &'static str },

    /// A well-formed platform response carrying a non-zero error code.
    ///
    /// `body` is the raw response that carried the error.
    #[error("{error}")]
    Platform { error: PlatformError, body: Vec<u8> },

    /// The credential store failed on read or write.
    #[error("cache error: {0}")]
    Cache(#[from] StoreError),

    /// Invalid construction-time configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The operation does not exist on this platform.
    #[error("{operation} is not available on the {platform} platform")]
    Unsupported {
        operation: &'static str,
        platform: &'static str,
    },

    /// The caller cancelled the request while it was in flight.
    #[error("request cancelled")]
    Cancelled,

    /// The per-call timeout elapsed while the request was in flight.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl BrokerError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// The platform error, if this is one.
    pub fn platform_error(&self) -> Option<&PlatformError> {
        match self {
            Self::Platform { error, .. } => Some(error),
            _ => None,
        }
    }

    /// The raw response body that carried a platform error.
    pub fn response_body(&self) -> Option<&[u8]> {
        match self {
            Self::Platform { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Whether the platform reported an expired or invalid access token.
    pub fn is_credential_expired(&self) -> bool {
        self.platform_error()
            .map(PlatformError::is_credential_expired)
            .unwrap_or(false)
    }
}
