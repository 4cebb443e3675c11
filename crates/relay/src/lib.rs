// murmur-relay: WebSocket chat broker with presence and soft deletion.

pub mod api;
pub mod config;
pub mod error;
pub mod messages;
pub mod presence;
pub mod ws;

use std::{future::Future, time::Duration, time::Instant};

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::RelayConfig;
use crate::error::{
    attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
};
use crate::messages::MessageStore;
use crate::presence::PresenceRegistry;
use crate::ws::ConnectionRegistry;

const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Shared handles for every route and socket task.
#[derive(Debug, Clone)]
pub struct RelayState {
    pub presence: PresenceRegistry,
    pub messages: MessageStore,
    pub connections: ConnectionRegistry,
    pub heartbeat_interval: Duration,
}

impl RelayState {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            presence: PresenceRegistry::default(),
            messages: MessageStore::new(config.history_limit),
            connections: ConnectionRegistry::default(),
            heartbeat_interval: config.heartbeat_interval,
        }
    }
}

pub fn build_router(state: RelayState) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(ws::router(state.clone()))
            .merge(api::router(state)),
    )
}

pub fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

/// Serve the relay on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: RelayState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr().context("failed to read relay listener address")?;
    info!(listen_addr = %local_addr, "starting relay server");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("relay server exited unexpectedly")
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
