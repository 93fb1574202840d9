//! Mini-program login.

use serde::{Deserialize, Serialize};

use super::PlatformClient;
use crate::classifier::{check_response, CommonError};
use crate::error::{BrokerError, Result};
use crate::model::{query_escape, Platform};

const CODE2SESSION_PATH: &str = "/sns/jscode2session";

/// Result of exchanging a `wx.login` code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code2SessionResult {
    #[serde(flatten)]
    pub common: CommonError,

    #[serde(default)]
    pub openid: String,

    #[serde(default)]
    pub session_key: String,

    /// Present only when the app is bound to an open platform account.
    #[serde(default)]
    pub unionid: String,
}
crate::impl_error_shape!(Code2SessionResult, nested common);

impl PlatformClient {
    /// Exchange a login code for the user's openid and session key.
    ///
    /// Authenticated with the app id and secret, not the access token, so
    /// this call bypasses the invoker's refresh-and-retry.
    pub async fn code2session(&self, js_code: &str) -> Result<Code2SessionResult> {
        self.require_platform(Platform::MiniProgram, "code2session")?;

        let identity = self.broker.identity();
        let url = format!(
            "{}?appid={}&secret={}&js_code={}&grant_type=authorization_code",
            self.api_url(CODE2SESSION_PATH),
            query_escape(identity.app_id()),
            query_escape(identity.secret().expose()),
            query_escape(js_code)
        );

        let body = self.broker.transport().get(&url).await?;
        let result: Code2SessionResult =
            serde_json::from_slice(&body).map_err(BrokerError::Decode)?;
        check_response(&result, CODE2SESSION_PATH, &body)?;

        tracing::debug!("code2session resolved openid {}", result.openid);
        Ok(result)
    }
}
