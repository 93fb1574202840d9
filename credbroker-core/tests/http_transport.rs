//! Integration tests for the reqwest transport and the platform clients,
//! run against a local wiremock server.

use credbroker_core::store::{CredentialStore, MemoryStore};
use credbroker_core::transport::{HttpTransport, Transport, TransportError};
use credbroker_core::{jsapi_signature, BrokerError, Platform, PlatformClient, PlatformConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{body_json, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn mini_config(server: &MockServer) -> PlatformConfig {
    PlatformConfig::new("wx-app", "wx-secret").with_api_base(server.uri())
}

fn work_config(server: &MockServer) -> PlatformConfig {
    PlatformConfig::new("corp-1", "corp-secret")
        .with_cache_prefix("crm")
        .with_api_base(server.uri())
}

async fn mount_mini_authority(server: &MockServer, token: &str) {
    Mock::given(method("GET"))
        .and(path("/cgi-bin/token"))
        .and(query_param("grant_type", "client_credential"))
        .and(query_param("appid", "wx-app"))
        .and(query_param("secret", "wx-secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": token, "expires_in": 7200})),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_get_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    let body = transport.get(&format!("{}/ping", server.uri())).await.unwrap();
    assert_eq!(body, b"pong");
}

#[tokio::test]
async fn test_non_success_status_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    let uri = format!("{}/broken?access_token=secret-token", server.uri());
    let err = transport.get(&uri).await.unwrap_err();

    match err {
        TransportError::Status { uri, status } => {
            assert_eq!(status, 502);
            assert!(uri.contains("access_token=***"));
            assert!(!uri.contains("secret-token"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_post_json_sets_content_type() {
    let server = MockServer::start().await;
    let params = json!({"touser": "o1", "msgtype": "text"});
    Mock::given(method("POST"))
        .and(path("/send"))
        .and(header("Content-Type", "application/json;charset=utf-8"))
        .and(body_json(&params))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"errcode":0}"#))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    let body = transport
        .post_json(&format!("{}/send", server.uri()), &params)
        .await
        .unwrap();
    assert_eq!(body, br#"{"errcode":0}"#);
}

#[tokio::test]
async fn test_post_sends_raw_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(header("Content-Type", "application/octet-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::from_client(reqwest::Client::new(), true);
    let headers = vec![(
        "Content-Type".to_string(),
        "application/octet-stream".to_string(),
    )];
    let body = transport
        .post(&format!("{}/upload", server.uri()), b"\x00\x01", &headers)
        .await
        .unwrap();
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn test_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let transport = HttpTransport::with_options(Duration::from_millis(100), false).unwrap();
    let err = transport
        .get(&format!("{}/slow", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Request { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_client_invokes_api_with_cached_token() {
    let server = MockServer::start().await;
    mount_mini_authority(&server, "live-token").await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/user/info"))
        .and(query_param("openid", "o1"))
        .and(query_param("access_token", "live-token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"errcode": 0, "nickname": "zhang"})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let client =
        PlatformClient::from_config(Platform::MiniProgram, &mini_config(&server), Some(store.clone()))
            .unwrap();

    let uri = client.api_url("/cgi-bin/user/info?openid=o1");
    for _ in 0..2 {
        let value: serde_json::Value = client.invoker().get(&uri).await.unwrap();
        assert_eq!(value["nickname"], "zhang");
    }
    assert_eq!(
        store.get("wechat:miniprogram::wx-app").await.unwrap().unwrap().expose(),
        "live-token"
    );
}

#[tokio::test]
async fn test_code2session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sns/jscode2session"))
        .and(query_param("appid", "wx-app"))
        .and(query_param("secret", "wx-secret"))
        .and(query_param("js_code", "code-1"))
        .and(query_param("grant_type", "authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "openid": "o1",
            "session_key": "sk",
            "unionid": "u1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = PlatformClient::from_config(
        Platform::MiniProgram,
        &mini_config(&server),
        Some(Arc::new(MemoryStore::new())),
    )
    .unwrap();

    let session = client.code2session("code-1").await.unwrap();
    assert_eq!(session.openid, "o1");
    assert_eq!(session.session_key, "sk");
    assert_eq!(session.unionid, "u1");
}

#[tokio::test]
async fn test_code2session_platform_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sns/jscode2session"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"errcode": 40029, "errmsg": "invalid code"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = PlatformClient::from_config(
        Platform::MiniProgram,
        &mini_config(&server),
        Some(Arc::new(MemoryStore::new())),
    )
    .unwrap();

    let err = client.code2session("bad").await.unwrap_err();
    let platform = err.platform_error().unwrap();
    assert_eq!(platform.code, 40029);
    assert_eq!(platform.api, "/sns/jscode2session");
}

#[tokio::test]
async fn test_jsapi_ticket_is_cached_and_signed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/gettoken"))
        .and(query_param("corpid", "corp-1"))
        .and(query_param("corpsecret", "corp-secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"errcode": 0, "access_token": "work-token", "expires_in": 7200})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/get_jsapi_ticket"))
        .and(query_param("access_token", "work-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errcode": 0,
            "errmsg": "ok",
            "ticket": "ticket-1",
            "expires_in": 7200
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let client =
        PlatformClient::from_config(Platform::Work, &work_config(&server), Some(store.clone()))
            .unwrap();

    assert_eq!(client.jsapi_ticket().await.unwrap().expose(), "ticket-1");
    assert_eq!(client.jsapi_ticket().await.unwrap().expose(), "ticket-1");
    assert!(store.ttl("wechat:work:crm:ticket:corp-1").is_some());

    let config = client
        .jsapi_config("nonce", 1698145746, "https://example.com/page")
        .await
        .unwrap();
    assert_eq!(config.app_id, "corp-1");
    assert_eq!(config.nonce_str, "nonce");
    assert_eq!(
        config.signature,
        jsapi_signature("ticket-1", "nonce", 1698145746, "https://example.com/page")
    );
}

#[tokio::test]
async fn test_jsapi_ticket_refreshes_expired_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/gettoken"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "fresh-token", "expires_in": 7200})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/get_jsapi_ticket"))
        .and(query_param("access_token", "stale-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"errcode": 40001, "errmsg": "invalid credential"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/get_jsapi_ticket"))
        .and(query_param("access_token", "fresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"errcode": 0, "ticket": "ticket-2", "expires_in": 7200})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    store
        .set(
            "wechat:work:crm:corp-1",
            &credbroker_core::Secret::new("stale-token"),
            Duration::from_secs(600),
        )
        .await
        .unwrap();

    let client =
        PlatformClient::from_config(Platform::Work, &work_config(&server), Some(store.clone()))
            .unwrap();

    assert_eq!(client.jsapi_ticket().await.unwrap().expose(), "ticket-2");
    assert_eq!(
        store.get("wechat:work:crm:corp-1").await.unwrap().unwrap().expose(),
        "fresh-token"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_jsapi_ticket_calls_fetch_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/gettoken"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"errcode": 0, "access_token": "work-token", "expires_in": 7200})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/get_jsapi_ticket"))
        .and(query_param("access_token", "work-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"errcode": 0, "ticket": "shared-ticket", "expires_in": 7200}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = Arc::new(
        PlatformClient::from_config(
            Platform::Work,
            &work_config(&server),
            Some(Arc::new(MemoryStore::new())),
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.jsapi_ticket().await })
        })
        .collect();

    for handle in handles {
        let ticket = handle.await.unwrap().unwrap();
        assert_eq!(ticket.expose(), "shared-ticket");
    }
    server.verify().await;
}

#[tokio::test]
async fn test_pinned_client_needs_no_store() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/get_jsapi_ticket"))
        .and(query_param("access_token", "pinned"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"errcode": 0, "ticket": "t", "expires_in": 7200})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let config = work_config(&server).with_access_token("pinned");
    let client = PlatformClient::from_config(Platform::Work, &config, None).unwrap();

    assert_eq!(client.access_token().await.unwrap().expose(), "pinned");
    // without a store the ticket is fetched on every call
    client.jsapi_ticket().await.unwrap();
    client.jsapi_ticket().await.unwrap();
}

#[tokio::test]
async fn test_platform_specific_operations_are_guarded() {
    let config = PlatformConfig::new("corp-1", "corp-secret").with_cache_prefix("crm");
    let work =
        PlatformClient::from_config(Platform::Work, &config, Some(Arc::new(MemoryStore::new())))
            .unwrap();
    let err = work.code2session("code").await.unwrap_err();
    assert!(matches!(err, BrokerError::Unsupported { operation: "code2session", .. }));

    let mini = PlatformClient::from_config(
        Platform::MiniProgram,
        &PlatformConfig::new("wx-app", "wx-secret"),
        Some(Arc::new(MemoryStore::new())),
    )
    .unwrap();
    let err = mini.jsapi_ticket().await.unwrap_err();
    assert!(matches!(err, BrokerError::Unsupported { operation: "jsapi_ticket", .. }));
}
