//! jsapi signatures for the work platform's JS-SDK.

use sha1::{Digest, Sha1};

/// SHA-1 signature of a page URL for `wx.config` / `wx.agentConfig`.
///
/// The signed string is
/// `jsapi_ticket=<ticket>&noncestr=<nonce>&timestamp=<timestamp>&url=<url>`;
/// the result is lowercase hex. `url` must be the page URL without its
/// fragment.
pub fn jsapi_signature(ticket: &str, nonce: &str, timestamp: i64, url: &str) -> String {
    let plain = format!(
        "jsapi_ticket={}&noncestr={}&timestamp={}&url={}",
        ticket, nonce, timestamp, url
    );
    hex::encode(Sha1::digest(plain.as_bytes()))
}
