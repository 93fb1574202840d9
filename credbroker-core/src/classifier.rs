//! Response error classification.
//!
//! Every platform response carries an `errcode`/`errmsg` pair, either at the
//! top level of the decoded type or inside an embedded [`CommonError`]. A
//! decode target exposes whichever layout it uses through [`ErrorShape`],
//! usually via [`impl_error_shape!`](crate::impl_error_shape):
//!
//! ```
//! use credbroker_core::{impl_error_shape, CommonError};
//! use serde::Deserialize;
//!
//! // errcode/errmsg embedded through a shared block
//! #[derive(Deserialize)]
//! struct UserInfo {
//!     #[serde(flatten)]
//!     common: CommonError,
//!     name: String,
//! }
//! impl_error_shape!(UserInfo, nested common);
//!
//! // errcode/errmsg declared directly
//! #[derive(Deserialize)]
//! struct Ticket {
//!     #[serde(default)]
//!     errcode: i32,
//!     #[serde(default)]
//!     errmsg: String,
//!     ticket: String,
//! }
//! impl_error_shape!(Ticket);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::BrokerError;

/// Error code the platforms return for an expired or invalid access token.
pub const CREDENTIAL_EXPIRED: i64 = 40001;

/// The `errcode`/`errmsg` block shared by platform responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonError {
    #[serde(default)]
    pub errcode: i64,

    #[serde(default)]
    pub errmsg: String,
}

/// Borrowed view of a response's error fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorFields<'a> {
    pub code: i64,
    pub message: &'a str,
}

/// Implemented by every type the invoker decodes responses into.
pub trait ErrorShape {
    /// The response's error fields, or `None` if the type has none.
    fn error_fields(&self) -> Option<ErrorFields<'_>>;
}

impl ErrorShape for CommonError {
    fn error_fields(&self) -> Option<ErrorFields<'_>> {
        Some(ErrorFields {
            code: self.errcode,
            message: &self.errmsg,
        })
    }
}

/// Untyped responses: a nested `common_error` object wins over top-level
/// `errcode`/`errmsg`. An object with neither is a success, since the
/// platforms omit `errcode` on many successful replies. Only a non-object
/// value has no error shape.
impl ErrorShape for serde_json::Value {
    fn error_fields(&self) -> Option<ErrorFields<'_>> {
        fn fields_of(value: &serde_json::Value) -> Option<ErrorFields<'_>> {
            let code = value.get("errcode")?.as_i64()?;
            let message = value
                .get("errmsg")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            Some(ErrorFields { code, message })
        }

        self.get("common_error")
            .and_then(fields_of)
            .or_else(|| fields_of(self))
            .or_else(|| {
                self.is_object().then_some(ErrorFields {
                    code: 0,
                    message: "",
                })
            })
    }
}

/// Implement [`ErrorShape`] for a response type.
///
/// - `impl_error_shape!(Type)` reads top-level `errcode`/`errmsg` fields.
/// - `impl_error_shape!(Type, nested field)` delegates to an embedded
///   [`CommonError`] (or any other `ErrorShape`) stored in `field`.
#[macro_export]
macro_rules! impl_error_shape {
    ($ty:ty) => {
        impl $crate::classifier::ErrorShape for $ty {
            fn error_fields(&self) -> Option<$crate::classifier::ErrorFields<'_>> {
                Some($crate::classifier::ErrorFields {
                    code: i64::from(self.errcode),
                    message: &self.errmsg,
                })
            }
        }
    };
    ($ty:ty, nested $field:ident) => {
        impl $crate::classifier::ErrorShape for $ty {
            fn error_fields(&self) -> Option<$crate::classifier::ErrorFields<'_>> {
                $crate::classifier::ErrorShape::error_fields(&self.$field)
            }
        }
    };
}

/// A well-formed platform response with a non-zero error code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("platform request failed: errcode={code} errmsg={message} api={api}")]
pub struct PlatformError {
    pub code: i64,
    pub message: String,
    /// The API that produced the error (request path without query).
    pub api: String,
}

impl PlatformError {
    pub fn new(code: i64, message: impl Into<String>, api: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            api: api.into(),
        }
    }

    /// Whether the platform reported an expired or invalid access token.
    pub fn is_credential_expired(&self) -> bool {
        self.code == CREDENTIAL_EXPIRED
    }
}

/// Why a decoded response was not a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// The decode target exposes no error fields. A programming error.
    Shape,

    /// The platform returned a non-zero code.
    Platform(PlatformError),
}

/// Inspect a decoded response.
///
/// `api` identifies the call for error reports and is reduced to its path,
/// so the query string (which may hold credentials) and the host are dropped.
pub fn classify<T: ErrorShape + ?Sized>(target: &T, api: &str) -> Result<(), Classified> {
    let fields = target.error_fields().ok_or(Classified::Shape)?;
    if fields.code == 0 {
        return Ok(());
    }
    Err(Classified::Platform(PlatformError::new(
        fields.code,
        fields.message,
        api_name(api),
    )))
}

/// Classify `target` and turn a failure into a [`BrokerError`].
pub(crate) fn check_response<T: ErrorShape>(
    target: &T,
    api: &str,
    body: &[u8],
) -> Result<(), BrokerError> {
    classify(target, api).map_err(|classified| match classified {
        Classified::Shape => BrokerError::Shape {
            type_name: std::any::type_name::<T>(),
        },
        Classified::Platform(error) => BrokerError::Platform {
            error,
            body: body.to_vec(),
        },
    })
}

/// Path of a request URI, e.g. `/cgi-bin/user/info`.
///
/// Absolute URIs and bare paths give the same name.
pub(crate) fn api_name(uri: &str) -> String {
    match url::Url::parse(uri) {
        Ok(url) => url.path().to_string(),
        Err(_) => uri
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(uri)
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Nested {
        #[serde(flatten)]
        common: CommonError,
        #[serde(default)]
        openid: String,
    }
    crate::impl_error_shape!(Nested, nested common);

    #[derive(Debug, Deserialize)]
    struct Flat {
        #[serde(default)]
        errcode: i32,
        #[serde(default)]
        errmsg: String,
    }
    crate::impl_error_shape!(Flat);

    struct Opaque;

    impl ErrorShape for Opaque {
        fn error_fields(&self) -> Option<ErrorFields<'_>> {
            None
        }
    }

    #[test]
    fn test_nested_shape_success_and_failure() {
        let ok: Nested = serde_json::from_str(r#"{"openid":"o1"}"#).unwrap();
        assert_eq!(ok.openid, "o1");
        assert_eq!(classify(&ok, "/sns/jscode2session"), Ok(()));

        let failed: Nested =
            serde_json::from_str(r#"{"errcode":40029,"errmsg":"invalid code"}"#).unwrap();
        match classify(&failed, "/sns/jscode2session?appid=wx&secret=s") {
            Err(Classified::Platform(e)) => {
                assert_eq!(e.code, 40029);
                assert_eq!(e.message, "invalid code");
                assert_eq!(e.api, "/sns/jscode2session");
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_flat_shape() {
        let failed: Flat =
            serde_json::from_str(r#"{"errcode":40001,"errmsg":"invalid credential"}"#).unwrap();
        let err = classify(&failed, "/cgi-bin/user/get").unwrap_err();
        assert!(matches!(err, Classified::Platform(ref e) if e.is_credential_expired()));

        let ok: Flat = serde_json::from_str(r#"{"errcode":0,"errmsg":"ok"}"#).unwrap();
        assert_eq!(classify(&ok, "/cgi-bin/user/get"), Ok(()));
    }

    #[test]
    fn test_type_without_shape() {
        assert_eq!(classify(&Opaque, "/x"), Err(Classified::Shape));
    }

    #[test]
    fn test_json_value_prefers_nested_common_error() {
        let value = json!({
            "common_error": {"errcode": 40001, "errmsg": "nested"},
            "errcode": 0
        });
        let fields = value.error_fields().unwrap();
        assert_eq!(fields.code, 40001);
        assert_eq!(fields.message, "nested");
    }

    #[test]
    fn test_json_value_falls_back_to_top_level() {
        let value = json!({"errcode": 45009, "errmsg": "api freq out of limit"});
        let fields = value.error_fields().unwrap();
        assert_eq!(fields.code, 45009);

        let empty_nested = json!({"common_error": {}, "errcode": 0});
        assert_eq!(empty_nested.error_fields().unwrap().code, 0);
    }

    #[test]
    fn test_json_object_without_error_fields_is_success() {
        let value = json!({"userid": "zhangsan"});
        assert_eq!(classify(&value, "/cgi-bin/user/get"), Ok(()));
    }

    #[test]
    fn test_json_non_object_has_no_error_shape() {
        assert_eq!(classify(&json!([1, 2]), "/api"), Err(Classified::Shape));
        assert_eq!(classify(&json!("text"), "/api"), Err(Classified::Shape));
        assert_eq!(classify(&json!(null), "/api"), Err(Classified::Shape));
    }

    #[test]
    fn test_api_name_is_the_bare_path() {
        assert_eq!(
            api_name("https://api.weixin.qq.com/cgi-bin/user/info?openid=o1&access_token=t"),
            "/cgi-bin/user/info"
        );
        assert_eq!(api_name("/sns/jscode2session?js_code=c"), "/sns/jscode2session");
        assert_eq!(api_name("/cgi-bin/gettoken"), "/cgi-bin/gettoken");
    }

    #[test]
    fn test_check_response_maps_to_broker_error() {
        let failed: Flat = serde_json::from_str(r#"{"errcode":48001}"#).unwrap();
        let err = check_response(&failed, "/api", b"raw").unwrap_err();
        assert_eq!(err.platform_error().unwrap().code, 48001);
        assert_eq!(err.response_body().unwrap(), b"raw");

        let err = check_response(&Opaque, "/api", b"raw").unwrap_err();
        assert!(matches!(err, BrokerError::Shape { type_name } if type_name.ends_with("Opaque")));
    }
}
