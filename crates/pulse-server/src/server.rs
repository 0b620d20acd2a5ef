use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header::{HeaderName, HeaderValue, CACHE_CONTROL, CONNECTION};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use pulse_core::config::StreamTiming;
use pulse_core::errors::AdmissionError;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::admission::{IdentityProvider, RoleAllowList};
use crate::broadcaster::Broadcaster;
use crate::registry::ConnectionRegistry;
use crate::session;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    /// Outbound frames buffered per connection before a write counts as failed.
    pub queue_depth: usize,
    pub timing: StreamTiming,
    pub allow_list: RoleAllowList,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4610,
            queue_depth: 64,
            timing: StreamTiming::default(),
            allow_list: RoleAllowList::default(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Broadcaster,
    pub identity: Arc<dyn IdentityProvider>,
    pub allow_list: RoleAllowList,
    pub timing: StreamTiming,
    pub queue_depth: usize,
    pub shutdown: CancellationToken,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/events", get(events_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    identity: Arc<dyn IdentityProvider>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ConnectionRegistry::new());
    let broadcaster = Broadcaster::new(Arc::clone(&registry));
    let shutdown = CancellationToken::new();

    let state = AppState {
        registry: Arc::clone(&registry),
        broadcaster: broadcaster.clone(),
        identity,
        allow_list: config.allow_list.clone(),
        timing: config.timing,
        queue_depth: config.queue_depth,
        shutdown: shutdown.clone(),
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "live feed server started");

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
            .ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        broadcaster,
        shutdown,
        _server: server,
    })
}

/// Handle returned by `start()` — keeps the accept loop alive and exposes the
/// in-process broadcast entry point to business logic.
pub struct ServerHandle {
    pub port: u16,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Broadcaster,
    shutdown: CancellationToken,
    _server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Cancel every open stream session and stop accepting connections.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Long-lived SSE endpoint. Admission runs here, before any byte is streamed.
async fn events_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let caller = match state.identity.authenticate(&headers).await {
        Some(caller) => caller,
        None => return admission_response(AdmissionError::NotAuthenticated),
    };
    if let Err(err) = state.allow_list.admit(&caller) {
        tracing::info!(user_id = %caller.user_id, role = %caller.role, "subscription rejected");
        return admission_response(err);
    }

    let frames = session::open(
        Arc::clone(&state.registry),
        state.timing,
        state.queue_depth,
        caller.user_id,
        state.shutdown.clone(),
    );
    let stream = frames.map(|json| Ok::<_, Infallible>(Event::default().data(json)));

    let mut response = Sse::new(stream).into_response();
    // Long-lived push channel: stop intermediaries from caching or buffering.
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

fn admission_response(err: AdmissionError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, err.to_string()).into_response()
}

/// Health check HTTP endpoint; reports the live-connection count.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "connections": state.registry.size(),
    }))
}
