//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

use request_defense::clock::ManualClock;
use request_defense::config::schema::SecretEntry;
use request_defense::config::{DefenseConfig, RouteConfig};
use request_defense::http::{AppState, Upstream};
use request_defense::observability::metrics::RequestStats;
use request_defense::security::secrets::{Secret, SigningAlgorithm};
use request_defense::Defense;

pub const PASSWORD: &str = "correct horse battery staple";
pub const SECRET_V1: &str = "integration-secret-v1-0123456789abcdefghijkl";
pub const SECRET_V2: &str = "integration-secret-v2-0123456789abcdefghijkl";

/// Start a mock upstream on an ephemeral port.
///
/// `POST /auth/login` accepts [`PASSWORD`] and answers with an identity
/// (`root` gets the admin role); everything else echoes what it received.
pub async fn start_mock_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/auth/login", post(login))
        .fallback(echo);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Like [`start_mock_upstream`], but the login route counts the credential
/// checks it performs and takes `delay` over each.
pub async fn start_counting_upstream(delay: Duration) -> (SocketAddr, Arc<AtomicUsize>) {
    let checks = Arc::new(AtomicUsize::new(0));
    let counter = checks.clone();
    let app = Router::new()
        .route(
            "/auth/login",
            post(move |body: Json<Value>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    login(body).await
                }
            }),
        )
        .fallback(echo);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, checks)
}

async fn login(Json(body): Json<Value>) -> Result<Json<Value>, StatusCode> {
    let username = body["username"].as_str().unwrap_or_default();
    if body["password"].as_str() != Some(PASSWORD) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let roles = if username == "root" { vec!["admin"] } else { vec!["user"] };
    Ok(Json(json!({
        "subject": username,
        "roles": roles,
        "permissions": ["read"],
    })))
}

async fn echo(request: Request<Body>) -> Json<Value> {
    let (parts, body) = request.into_parts();
    let (path, subject, roles) = {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        (
            parts.uri.path().to_string(),
            header("x-auth-subject"),
            header("x-auth-roles"),
        )
    };
    let bytes = to_bytes(body, usize::MAX).await.unwrap_or_default();

    Json(json!({
        "path": path,
        "subject": subject,
        "roles": roles,
        "body": String::from_utf8_lossy(&bytes),
    }))
}

/// Defaults tuned for tests: pinned secret, fast store deadline, and an
/// `/api/notes` route that sanitizes a `content` field.
pub fn test_config(upstream: SocketAddr) -> DefenseConfig {
    let mut config = DefenseConfig::default();
    config.upstream.address = upstream.to_string();
    config.upstream.timeout_secs = 5;
    config.tokens.secrets = vec![SecretEntry {
        id: "v1".into(),
        secret: SECRET_V1.into(),
        algorithm: "HS256".into(),
    }];
    config.payload.max_body_bytes = 4096;
    config.routing.routes.push(RouteConfig {
        name: "notes".into(),
        path_prefix: "/api/notes".into(),
        tier: Some("loose".into()),
        authenticated: Some(true),
        long_text_fields: vec!["content".into()],
        max_field_length: Some(16),
        priority: 10,
    });
    config.routing.routes.push(RouteConfig {
        name: "public".into(),
        path_prefix: "/public".into(),
        tier: Some("strict".into()),
        authenticated: Some(false),
        long_text_fields: Vec::new(),
        max_field_length: None,
        priority: 10,
    });
    config
}

pub struct TestGateway {
    pub router: Router,
    pub defense: Arc<Defense>,
    pub stats: Arc<RequestStats>,
    pub clock: Arc<ManualClock>,
}

impl TestGateway {
    pub fn new(config: &DefenseConfig) -> Self {
        let clock = Arc::new(ManualClock::at_secs(1_700_000_000));
        let secret = Secret::new("v1", SECRET_V1.as_bytes().to_vec(), SigningAlgorithm::HS256).unwrap();
        let defense = Arc::new(Defense::from_config(config, vec![secret], clock.clone()).unwrap());
        let stats = Arc::new(RequestStats::new());
        let state = AppState::new(
            defense.clone(),
            Upstream::from_config(&config.upstream).unwrap(),
            stats.clone(),
            config.listener.max_connections,
        );

        Self {
            router: request_defense::http::build_router(config, state),
            defense,
            stats,
            clock,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        TestResponse { status, headers, body }
    }

    pub async fn login(&self, username: &str, password: &str, from: IpAddr) -> TestResponse {
        let body = json!({ "username": username, "password": password });
        self.send(json_request("POST", "/auth/login", &body, from, None)).await
    }

    /// Log in and return `(access_token, refresh_token)`.
    pub async fn tokens_for(&self, username: &str, from: IpAddr) -> (String, String) {
        let response = self.login(username, PASSWORD, from).await;
        assert_eq!(response.status, StatusCode::OK, "login failed: {:?}", response.json());
        let pair = response.json();
        (
            pair["access_token"].as_str().unwrap().to_string(),
            pair["refresh_token"].as_str().unwrap().to_string(),
        )
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn code(&self) -> Option<String> {
        self.json()["error"]["code"].as_str().map(str::to_owned)
    }

    pub fn retry_after(&self) -> Option<u64> {
        self.headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }
}

pub fn client(last_octet: u8) -> IpAddr {
    IpAddr::from([203, 0, 113, last_octet])
}

pub fn get(path: &str, from: IpAddr, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    with_peer(builder.body(Body::empty()).unwrap(), from)
}

pub fn json_request(method: &str, path: &str, body: &Value, from: IpAddr, bearer: Option<&str>) -> Request<Body> {
    let bytes = serde_json::to_vec(body).unwrap();
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .header("content-length", bytes.len());
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    with_peer(builder.body(Body::from(bytes)).unwrap(), from)
}

pub fn with_peer(mut request: Request<Body>, from: IpAddr) -> Request<Body> {
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::new(from, 40_000)));
    request
}
