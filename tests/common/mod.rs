//! Shared helpers: an app wired to in-memory stores and a wiremock Salesforce.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header::AUTHORIZATION, Method, Request, StatusCode};
use axum::Router;
use base64::Engine as _;
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use markmail_crm_auth::auth::Claims;
use markmail_crm_auth::crypto::CryptoEngine;
use markmail_crm_auth::providers::{self, ProviderRegistry};
use markmail_crm_auth::store::{MemoryCredentialStore, MemoryStateStore};
use markmail_crm_auth::{api, AppState, Config};

pub const JWT_SECRET: &str = "integration-test-secret";
pub const TOKEN_PATH: &str = "/services/oauth2/token";
pub const USERINFO_PATH: &str = "/services/oauth2/userinfo";
pub const REVOKE_PATH: &str = "/services/oauth2/revoke";
pub const LEAD_PATH: &str = "/services/data/v60.0/sobjects/Lead/";

pub struct TestApp {
    pub router: Router,
    pub credentials: Arc<MemoryCredentialStore>,
    pub salesforce: MockServer,
}

/// Build a `Config` pointing every Salesforce endpoint at `salesforce_uri`.
pub fn test_config(salesforce_uri: &str, http_timeout: Duration) -> Config {
    let b64 = base64::engine::general_purpose::STANDARD;
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        base_url: "http://localhost:3000".into(),
        database_url: None,
        master_key: b64.encode([7u8; 32]),
        state_secret: b64.encode([9u8; 32]),
        jwt_secret: JWT_SECRET.into(),
        state_ttl: Duration::from_secs(600),
        http_timeout,
        default_token_lifetime: Duration::from_secs(7200),
        refresh_skew: Duration::from_secs(300),
        salesforce_client_id: Some("test-client".into()),
        salesforce_client_secret: Some("test-secret".into()),
        salesforce_redirect_uri: "http://localhost:3000/crm/oauth/salesforce/callback".into(),
        salesforce_auth_url: format!("{salesforce_uri}/services/oauth2/authorize"),
        salesforce_token_url: format!("{salesforce_uri}{TOKEN_PATH}"),
        salesforce_revoke_url: format!("{salesforce_uri}{REVOKE_PATH}"),
        salesforce_userinfo_url: format!("{salesforce_uri}{USERINFO_PATH}"),
        salesforce_scopes: vec!["api".into(), "refresh_token".into()],
        salesforce_api_version: "v60.0".into(),
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_timeout(Duration::from_secs(5)).await
}

pub async fn spawn_app_with_timeout(http_timeout: Duration) -> TestApp {
    let salesforce = MockServer::start().await;
    let config = test_config(&salesforce.uri(), http_timeout);

    let crypto = Arc::new(CryptoEngine::new(&config.master_key, &config.state_secret).unwrap());
    let credentials = Arc::new(MemoryCredentialStore::new());

    let mut registry = ProviderRegistry::new();
    providers::register_defaults(&mut registry, &config).unwrap();

    let state = AppState::new(
        &config,
        crypto,
        credentials.clone(),
        Arc::new(MemoryStateStore::new()),
        registry,
    );

    TestApp {
        router: api::router(Arc::new(state)),
        credentials,
        salesforce,
    }
}

/// A MarkMail session token for `user_id`.
pub fn bearer(user_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.into(),
        email: Some(format!("{user_id}@example.com")),
        name: None,
        exp: now + 3600,
        iat: Some(now),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {token}")
}

pub async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    user_id: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user_id {
        builder = builder.header(AUTHORIZATION, bearer(user));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

pub async fn get(app: &TestApp, uri: &str, user_id: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, Some(user_id), None).await
}

/// Call init and pull the `state` query parameter out of the returned URL.
pub async fn init_state(app: &TestApp, user_id: &str) -> String {
    let (status, body) = get(app, "/crm/oauth/salesforce/init", user_id).await;
    assert_eq!(status, StatusCode::OK, "init failed: {body}");

    let auth_url = url::Url::parse(body["auth_url"].as_str().unwrap()).unwrap();
    auth_url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

pub fn callback_uri(code: &str, state: &str) -> String {
    format!("/crm/oauth/salesforce/callback?code={code}&state={state}")
}

/// Stub the authorization-code grant with the given token response.
pub async fn mock_code_exchange(app: &TestApp, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(response)
        .mount(&app.salesforce)
        .await;
}

/// Run init and callback for `user_id` against a token endpoint that
/// returns `expires_in` and a refresh token.
pub async fn connect(app: &TestApp, user_id: &str, expires_in: u64) {
    mock_code_exchange(
        app,
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "00Dinitial",
            "refresh_token": "5Aep-refresh",
            "token_type": "Bearer",
            "expires_in": expires_in,
            "instance_url": app.salesforce.uri(),
        })),
    )
    .await;

    let state = init_state(app, user_id).await;
    let (status, body) = get(app, &callback_uri("code-1", &state), user_id).await;
    assert_eq!(status, StatusCode::OK, "callback failed: {body}");
}
