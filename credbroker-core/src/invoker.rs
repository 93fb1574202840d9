//! Credentialed API calls with refresh-and-retry on token expiry.
//!
//! Every call made through [`Invoker`] follows the same protocol:
//!
//! ```text
//! access_token()                       (failure aborts, no retry budget used)
//!   └─> Attempt: attach token, send    (transport failure / cancel / timeout aborts)
//!         └─> CheckExpiry: decode + classify
//!               ├─ ok / other error ─────────> Done
//!               └─ 40001 ──> Refresh
//!                              ├─ refreshes > bound ──> give up with last error + body
//!                              └─ refresh_access_token(), refreshes += 1 ──> Attempt
//! ```
//!
//! The refresh counter lives on the stack of a single call; concurrent calls
//! never share budget.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::broker::AccessTokenBroker;
use crate::classifier::{api_name, classify, Classified, ErrorShape, PlatformError};
use crate::error::{BrokerError, Result};
use crate::model::query_escape;
use crate::store::Secret;
use crate::transport::{Transport, TransportError};

/// Refreshes allowed per call before giving up.
///
/// The budget is exhausted once the counter *exceeds* this value, so the
/// default permits four refreshes and five attempts.
pub const DEFAULT_MAX_REFRESHES: u32 = 3;

/// Body of an outbound call.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// `GET` without a body.
    Empty,

    /// `POST` with a raw body and extra headers.
    Raw {
        body: Vec<u8>,
        headers: Vec<(String, String)>,
    },

    /// `POST` with a JSON body.
    Json(serde_json::Value),
}

/// A single logical API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    uri: String,
    body: RequestBody,
    cancel: Option<CancellationToken>,
    timeout: Option<Duration>,
}

impl ApiRequest {
    /// `GET uri`. The URI may already carry a query string.
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(uri, RequestBody::Empty)
    }

    /// `POST uri` with a raw body.
    pub fn post(uri: impl Into<String>, body: Vec<u8>, headers: Vec<(String, String)>) -> Self {
        Self::new(uri, RequestBody::Raw { body, headers })
    }

    /// `POST uri` with `params` serialised as JSON.
    pub fn post_json<P: Serialize + ?Sized>(uri: impl Into<String>, params: &P) -> Result<Self> {
        let value = serde_json::to_value(params).map_err(TransportError::Encode)?;
        Ok(Self::new(uri, RequestBody::Json(value)))
    }

    fn new(uri: impl Into<String>, body: RequestBody) -> Self {
        Self {
            uri: uri.into(),
            body,
            cancel: None,
            timeout: None,
        }
    }

    /// Abort the transport step when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Abort any single transport step that takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The URI as given, without the access token.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }
}

/// State of one call's retry loop.
enum Step {
    Attempt,
    CheckExpiry(Vec<u8>),
    Refresh { error: PlatformError, body: Vec<u8> },
}

/// Wraps outbound calls with token attachment and retry-on-expiry.
#[derive(Clone)]
pub struct Invoker {
    broker: Arc<AccessTokenBroker>,
    transport: Arc<dyn Transport>,
    max_refreshes: u32,
}

impl Invoker {
    /// Create an invoker with the default refresh budget.
    pub fn new(broker: Arc<AccessTokenBroker>, transport: Arc<dyn Transport>) -> Self {
        Self {
            broker,
            transport,
            max_refreshes: DEFAULT_MAX_REFRESHES,
        }
    }

    /// Override the refresh budget.
    pub fn with_max_refreshes(mut self, max_refreshes: u32) -> Self {
        self.max_refreshes = max_refreshes;
        self
    }

    pub fn broker(&self) -> &Arc<AccessTokenBroker> {
        &self.broker
    }

    pub fn max_refreshes(&self) -> u32 {
        self.max_refreshes
    }

    /// `GET uri` and decode the response.
    pub async fn get<T>(&self, uri: &str) -> Result<T>
    where
        T: DeserializeOwned + ErrorShape,
    {
        self.execute(&ApiRequest::get(uri)).await
    }

    /// `GET uri` and return the raw body.
    pub async fn get_raw(&self, uri: &str) -> Result<Vec<u8>> {
        self.execute_raw(&ApiRequest::get(uri)).await
    }

    /// `POST uri` with a raw body and decode the response.
    pub async fn post<T>(&self, uri: &str, body: Vec<u8>, headers: Vec<(String, String)>) -> Result<T>
    where
        T: DeserializeOwned + ErrorShape,
    {
        self.execute(&ApiRequest::post(uri, body, headers)).await
    }

    /// `POST uri` with a raw body and return the raw response.
    pub async fn post_raw(
        &self,
        uri: &str,
        body: Vec<u8>,
        headers: Vec<(String, String)>,
    ) -> Result<Vec<u8>> {
        self.execute_raw(&ApiRequest::post(uri, body, headers)).await
    }

    /// `POST uri` with a JSON body and decode the response.
    pub async fn post_json<T, P>(&self, uri: &str, params: &P) -> Result<T>
    where
        T: DeserializeOwned + ErrorShape,
        P: Serialize + ?Sized,
    {
        self.execute(&ApiRequest::post_json(uri, params)?).await
    }

    /// `POST uri` with a JSON body and return the raw response.
    pub async fn post_json_raw<P>(&self, uri: &str, params: &P) -> Result<Vec<u8>>
    where
        P: Serialize + ?Sized,
    {
        self.execute_raw(&ApiRequest::post_json(uri, params)?).await
    }

    /// Send `request` once with the current token and return the raw body.
    ///
    /// Without a decode target there is nothing to classify, so no
    /// refresh-and-retry happens.
    pub async fn execute_raw(&self, request: &ApiRequest) -> Result<Vec<u8>> {
        let token = self.broker.access_token().await?;
        self.send(request, &token).await
    }

    /// Send `request`, decode the response into `T`, and refresh-and-retry
    /// while the platform reports an expired token.
    ///
    /// When the budget runs out the last [`BrokerError::Platform`] is
    /// returned together with the last raw body.
    pub async fn execute<T>(&self, request: &ApiRequest) -> Result<T>
    where
        T: DeserializeOwned + ErrorShape,
    {
        let api = api_name(&request.uri);
        let expired_code = self.broker.platform().credential_expired_code();
        let mut token = self.broker.access_token().await?;
        let mut refreshes = 0u32;
        let mut step = Step::Attempt;

        loop {
            step = match step {
                Step::Attempt => Step::CheckExpiry(self.send(request, &token).await?),

                Step::CheckExpiry(body) => {
                    let decoded: T = serde_json::from_slice(&body).map_err(BrokerError::Decode)?;
                    match classify(&decoded, &api) {
                        Ok(()) => return Ok(decoded),
                        Err(Classified::Shape) => {
                            return Err(BrokerError::Shape {
                                type_name: std::any::type_name::<T>(),
                            });
                        }
                        Err(Classified::Platform(error)) if error.code == expired_code => {
                            Step::Refresh { error, body }
                        }
                        Err(Classified::Platform(error)) => {
                            return Err(BrokerError::Platform { error, body });
                        }
                    }
                }

                Step::Refresh { error, body } => {
                    if refreshes > self.max_refreshes {
                        tracing::warn!(
                            "Giving up on {} after {} token refreshes: {}",
                            api,
                            refreshes,
                            error
                        );
                        return Err(BrokerError::Platform { error, body });
                    }
                    tracing::debug!(
                        "{} reported an expired token (refresh {}), refreshing",
                        api,
                        refreshes + 1
                    );
                    token = self.broker.refresh_access_token().await?;
                    refreshes += 1;
                    Step::Attempt
                }
            };
        }
    }

    /// One transport round-trip, raced against cancellation and timeout.
    async fn send(&self, request: &ApiRequest, token: &Secret) -> Result<Vec<u8>> {
        let uri = attach_access_token(&request.uri, token.expose());

        let call = async {
            let sent = match &request.body {
                RequestBody::Empty => self.transport.get(&uri).await,
                RequestBody::Raw { body, headers } => {
                    self.transport.post(&uri, body, headers).await
                }
                RequestBody::Json(params) => self.transport.post_json(&uri, params).await,
            };
            sent.map_err(BrokerError::from)
        };

        let bounded = async {
            match request.timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(BrokerError::Timeout(limit)),
                },
                None => call.await,
            }
        };

        match &request.cancel {
            Some(cancel) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(BrokerError::Cancelled),
                    result = bounded => result,
                }
            }
            None => bounded.await,
        }
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("broker", &self.broker)
            .field("max_refreshes", &self.max_refreshes)
            .finish()
    }
}

/// Append `access_token=<token>` to `uri`.
///
/// # Examples
///
/// ```
/// use credbroker_core::invoker::attach_access_token;
///
/// assert_eq!(attach_access_token("https://h/a", "t"), "https://h/a?access_token=t");
/// assert_eq!(attach_access_token("https://h/a?x=1", "t"), "https://h/a?x=1&access_token=t");
/// ```
pub fn attach_access_token(uri: &str, token: &str) -> String {
    let separator = if uri.contains('?') { '&' } else { '?' };
    format!("{}{}access_token={}", uri, separator, query_escape(token))
}
