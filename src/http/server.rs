//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the defense pipeline and gateway endpoints
//! - Wire up middleware (tracing, timeout, request ID, accounting)
//! - Bind server to listener
//! - Forward admitted requests to the upstream

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{FromRequest, Request, State};
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{Method, StatusCode, Uri, Version};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::schema::{DefenseConfig, UpstreamConfig};
use crate::http::handlers;
use crate::http::middleware::{auth, guard, login, rate_limit, stats};
use crate::http::request::{request_id, UuidRequestId, X_REQUEST_ID};
use crate::observability::metrics::RequestStats;
use crate::routing::RoutePolicy;
use crate::security::Defense;

/// The upstream business application.
#[derive(Debug)]
pub struct Upstream {
    client: Client<HttpConnector, Body>,
    authority: Authority,
    timeout: Duration,
}

impl Upstream {
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, axum::http::uri::InvalidUri> {
        Ok(Self {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            authority: Authority::from_str(&config.address)?,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

/// Application state injected into handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub defense: Arc<Defense>,
    pub upstream: Arc<Upstream>,
    pub stats: Arc<RequestStats>,
    pub in_flight: Arc<Semaphore>,
}

impl AppState {
    pub fn new(defense: Arc<Defense>, upstream: Upstream, stats: Arc<RequestStats>, max_in_flight: usize) -> Self {
        Self {
            defense,
            upstream: Arc::new(upstream),
            stats,
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
        }
    }
}

/// HTTP server for the defense gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &DefenseConfig, state: AppState) -> Self {
        Self {
            router: build_router(config, state),
        }
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
///
/// Gateway endpoints (`/healthz`, `/metrics`) bypass the defense stack;
/// everything else runs guard → auth → rate limit → login before reaching
/// the refresh handler or the upstream.
#[allow(deprecated)]
pub fn build_router(config: &DefenseConfig, state: AppState) -> Router {
    let defended = Router::new()
        .fallback(dispatch)
        .layer(from_fn_with_state(state.clone(), login::login_guard))
        .layer(from_fn_with_state(state.clone(), rate_limit::rate_limit))
        .layer(from_fn_with_state(state.clone(), auth::authenticate))
        .layer(from_fn_with_state(state.clone(), guard::request_guard))
        .with_state(state.clone());

    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .fallback_service(defended)
        .layer(from_fn_with_state(state.clone(), stats::track_requests))
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "request",
                method = %request.method(),
                path = %request.uri().path(),
                request_id = %request_id(request),
            )
        }))
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
        .with_state(state)
}

/// Forward an admitted request to the upstream.
/// Route an admitted request by its policy. The refresh endpoint is
/// resolved on the normalized path, so every spelling of it lands here
/// instead of at the upstream.
async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let is_refresh = request
        .extensions()
        .get::<Arc<RoutePolicy>>()
        .is_some_and(|p| p.refresh);
    if !is_refresh {
        return proxy_handler(State(state), request).await;
    }

    if request.method() != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let payload = Json::<handlers::RefreshRequest>::from_request(request, &state).await;
    handlers::refresh(State(state), payload).await.into_response()
}

async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    let req_id = request_id(&request).to_string();
    let upstream = &state.upstream;

    let (mut parts, body) = request.into_parts();
    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(upstream.authority.clone());
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %req_id, error = %e, "Cannot build upstream URI");
            return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
        }
    };
    parts.version = Version::HTTP_11;

    tracing::debug!(request_id = %req_id, method = %parts.method, uri = %parts.uri, "Forwarding upstream");

    match tokio::time::timeout(upstream.timeout, upstream.client.request(Request::from_parts(parts, body))).await {
        Ok(Ok(response)) => {
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Ok(Err(e)) => {
            tracing::error!(request_id = %req_id, error = %e, "Upstream error");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
        Err(_) => {
            tracing::error!(request_id = %req_id, timeout = ?upstream.timeout, "Upstream timed out");
            (StatusCode::GATEWAY_TIMEOUT, "Upstream timed out").into_response()
        }
    }
}
