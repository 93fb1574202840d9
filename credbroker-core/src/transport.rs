//! Outbound HTTP transport.
//!
//! The broker and invoker only ever see the [`Transport`] trait. The default
//! implementation, [`HttpTransport`], wraps a `reqwest::Client`.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Request headers as `(name, value)` pairs.
pub type Headers = [(String, String)];

/// Error type for transport operations.
///
/// URIs carried by these errors have their `access_token` masked.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or the body could not be read.
    #[error("request to {uri} failed: {message}")]
    Request { uri: String, message: String },

    /// The server answered with a non-2xx status.
    #[error("request to {uri} returned HTTP {status}")]
    Status { uri: String, status: u16 },

    /// The JSON request body could not be encoded.
    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    /// The underlying HTTP client could not be built.
    #[error("failed to build HTTP client: {message}")]
    Client { message: String },
}

impl TransportError {
    fn request(uri: &str, err: impl std::fmt::Display) -> Self {
        Self::Request {
            uri: mask_access_token(uri),
            message: err.to_string(),
        }
    }
}

/// The three call shapes every platform API uses.
///
/// Implementations must treat any non-2xx status as an error rather than
/// returning the body.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `GET uri`.
    async fn get(&self, uri: &str) -> Result<Vec<u8>, TransportError>;

    /// `POST uri` with a raw body and extra headers.
    async fn post(
        &self,
        uri: &str,
        body: &[u8],
        headers: &Headers,
    ) -> Result<Vec<u8>, TransportError>;

    /// `POST uri` with `params` encoded as a JSON body.
    async fn post_json(
        &self,
        uri: &str,
        params: &serde_json::Value,
    ) -> Result<Vec<u8>, TransportError>;
}

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// `reqwest` backed [`Transport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    debug: bool,
}

impl HttpTransport {
    /// Create a transport with the default timeout and debug logging off.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_options(DEFAULT_TIMEOUT, false)
    }

    /// Create a transport with an explicit request timeout.
    ///
    /// With `debug` set, every outbound URI and raw response body is logged
    /// at `debug` level (access tokens are masked).
    pub fn with_options(timeout: Duration, debug: bool) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Client {
                message: e.to_string(),
            })?;

        Ok(Self { client, debug })
    }

    /// Wrap an existing client.
    pub fn from_client(client: reqwest::Client, debug: bool) -> Self {
        Self { client, debug }
    }

    async fn finish(
        &self,
        uri: &str,
        sent: reqwest::Result<reqwest::Response>,
    ) -> Result<Vec<u8>, TransportError> {
        let response = sent.map_err(|e| TransportError::request(uri, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                uri: mask_access_token(uri),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::request(uri, e))?
            .to_vec();

        if self.debug {
            tracing::debug!(
                "response from {}: {}",
                mask_access_token(uri),
                String::from_utf8_lossy(&body)
            );
        }

        Ok(body)
    }

    fn trace_request(&self, method: &str, uri: &str) {
        if self.debug {
            tracing::debug!("{} {}", method, mask_access_token(uri));
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, uri: &str) -> Result<Vec<u8>, TransportError> {
        self.trace_request("GET", uri);
        let sent = self.client.get(uri).send().await;
        self.finish(uri, sent).await
    }

    async fn post(
        &self,
        uri: &str,
        body: &[u8],
        headers: &Headers,
    ) -> Result<Vec<u8>, TransportError> {
        self.trace_request("POST", uri);
        let mut request = self.client.post(uri).body(body.to_vec());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let sent = request.send().await;
        self.finish(uri, sent).await
    }

    async fn post_json(
        &self,
        uri: &str,
        params: &serde_json::Value,
    ) -> Result<Vec<u8>, TransportError> {
        self.trace_request("POST", uri);
        let body = serde_json::to_vec(params)?;
        let sent = self
            .client
            .post(uri)
            .header("Content-Type", "application/json;charset=utf-8")
            .body(body)
            .send()
            .await;
        self.finish(uri, sent).await
    }
}

/// Replace the value of every `access_token` query parameter with `***`.
///
/// # Examples
///
/// ```
/// use credbroker_core::transport::mask_access_token;
///
/// assert_eq!(
///     mask_access_token("https://h/api?a=1&access_token=abc&b=2"),
///     "https://h/api?a=1&access_token=***&b=2"
/// );
/// ```
pub fn mask_access_token(uri: &str) -> String {
    const PARAM: &str = "access_token=";

    let Some((base, query)) = uri.split_once('?') else {
        return uri.to_string();
    };

    let masked: Vec<String> = query
        .split('&')
        .map(|pair| {
            if pair.starts_with(PARAM) {
                format!("{}***", PARAM)
            } else {
                pair.to_string()
            }
        })
        .collect();

    format!("{}?{}", base, masked.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_access_token() {
        assert_eq!(
            mask_access_token("https://h/api?access_token=secret"),
            "https://h/api?access_token=***"
        );
        assert_eq!(mask_access_token("https://h/api"), "https://h/api");
        assert_eq!(
            mask_access_token("https://h/api?x_access_token=keep"),
            "https://h/api?x_access_token=keep"
        );
    }

    #[test]
    fn test_status_error_masks_token() {
        let err = TransportError::Status {
            uri: mask_access_token("https://h/api?access_token=secret"),
            status: 502,
        };
        let msg = err.to_string();
        assert!(msg.contains("502"));
        assert!(!msg.contains("secret"));
    }

    #[test]
    fn test_http_transport_builds() {
        assert!(HttpTransport::with_options(Duration::from_secs(1), true).is_ok());
    }
}
