//! Work platform jsapi tickets and JS-SDK signatures.

use serde::{Deserialize, Serialize};

use super::PlatformClient;
use crate::broker::{load_or_fetch, IssuedCredential};
use crate::error::Result;
use crate::model::{ticket_key, Platform};
use crate::signature::jsapi_signature;
use crate::store::Secret;

const JSAPI_TICKET_PATH: &str = "/cgi-bin/get_jsapi_ticket";

/// Response of `/cgi-bin/get_jsapi_ticket`.
#[derive(Debug, Clone, Deserialize)]
pub struct JsapiTicketResponse {
    #[serde(default)]
    pub errcode: i64,

    #[serde(default)]
    pub errmsg: String,

    #[serde(default)]
    pub ticket: String,

    #[serde(default)]
    pub expires_in: i64,
}
crate::impl_error_shape!(JsapiTicketResponse);

/// Parameters a page passes to `wx.config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsapiConfig {
    pub app_id: String,
    pub timestamp: i64,
    pub nonce_str: String,
    pub signature: String,
}

impl PlatformClient {
    /// Return the corp's jsapi ticket, fetching it through the invoker on a
    /// cache miss.
    ///
    /// Tickets are cached under `<namespace>:<prefix>:ticket:<corp id>` with
    /// the same safety margin and single-flight guarantee as access tokens.
    /// A client without a store (pinned token) fetches on every call.
    pub async fn jsapi_ticket(&self) -> Result<Secret> {
        self.require_platform(Platform::Work, "jsapi_ticket")?;

        match self.broker.store() {
            Some(store) => {
                let key = ticket_key(
                    self.platform(),
                    self.broker.cache_prefix(),
                    self.broker.identity().app_id(),
                );
                load_or_fetch(store.as_ref(), &key, &self.ticket_lock, || {
                    self.fetch_jsapi_ticket()
                })
                .await
            }
            None => Ok(self.fetch_jsapi_ticket().await?.value),
        }
    }

    /// Build the signed `wx.config` parameters for a page.
    pub async fn jsapi_config(&self, nonce: &str, timestamp: i64, url: &str) -> Result<JsapiConfig> {
        let ticket = self.jsapi_ticket().await?;
        Ok(JsapiConfig {
            app_id: self.broker.identity().app_id().to_string(),
            timestamp,
            nonce_str: nonce.to_string(),
            signature: jsapi_signature(ticket.expose(), nonce, timestamp, url),
        })
    }

    async fn fetch_jsapi_ticket(&self) -> Result<IssuedCredential> {
        let response: JsapiTicketResponse =
            self.invoker.get(&self.api_url(JSAPI_TICKET_PATH)).await?;

        tracing::info!(
            "Fetched jsapi ticket for {} (expires in {}s)",
            self.broker.identity().app_id(),
            response.expires_in
        );

        Ok(IssuedCredential {
            value: Secret::new(response.ticket),
            expires_in: response.expires_in,
        })
    }
}
