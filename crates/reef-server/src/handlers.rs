//! HTTP handlers for the reef server.
//!
//! This module wires the messaging hub to axum routes: the JSON API, the
//! SSE stream, and the optional WebSocket stream.

use crate::config::Config;
use crate::metrics::{self, SessionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderName, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use reef_core::{ChatError, Hub, InMemoryStore, StreamSession};
use reef_protocol::{
    codec, ChannelId, ErrorBody, ErrorCode, HistoryQuery, NewMessage, StreamEvent, StreamQuery,
};
use reef_protocol::api::HealthBody;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The messaging hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state with an in-memory store seeded from the config.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured channel is invalid.
    pub fn new(config: Config) -> Result<Self> {
        let store = InMemoryStore::with_channels(config.seed_channels())
            .context("Invalid channel configuration")?;
        let hub = Hub::in_memory(Arc::new(store), config.hub_config());
        Ok(Self { hub, config })
    }
}

/// Error response carrying a structured body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody::new(ErrorCode::BadRequest, message),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let code = err.code();
        let status = match code {
            ErrorCode::BadRequest | ErrorCode::InvalidMessage => StatusCode::BAD_REQUEST,
            ErrorCode::UnknownChannel | ErrorCode::ChannelGone => StatusCode::NOT_FOUND,
            ErrorCode::StorageUnavailable | ErrorCode::Unavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        if status.is_server_error() {
            error!(error = %err, "Request failed");
        }
        Self {
            status,
            body: ErrorBody::new(code, err.to_string()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = serde_json::to_value(self.body.code)
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default();
        metrics::record_error(&code);
        (self.status, Json(self.body)).into_response()
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/channels", get(channels_handler))
        .route("/api/messages", get(history_handler).post(submit_handler))
        .route("/api/messages/stream", get(sse_handler));

    if state.config.stream.websocket {
        router = router.route("/api/messages/ws", get(ws_handler));
    }

    router.with_state(state)
}

/// Run the HTTP server until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_router(Arc::clone(&state));

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("reef server listening on {}", addr);
    info!("SSE endpoint: http://{}/api/messages/stream", addr);
    if config.stream.websocket {
        info!("WebSocket endpoint: ws://{}/api/messages/ws", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.hub.clone()))
        .await?;

    info!("reef server stopped");
    Ok(())
}

/// Wait for a shutdown signal, then end every live stream so open
/// connections can drain.
async fn shutdown_signal(hub: Hub) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    hub.shutdown();
}

fn require_channel(channel_id: Option<ChannelId>) -> Result<ChannelId, ApiError> {
    channel_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("channelId is required"))
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(HealthBody {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn channels_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let channels = state.hub.channels().await?;
    Ok(Json(channels).into_response())
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(mut query) = query?;
    query.channel_id = Some(require_channel(query.channel_id.take())?);

    let messages = state.hub.history(&query).await?;
    Ok(Json(messages).into_response())
}

async fn submit_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewMessage>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(message) = body?;
    let start = Instant::now();

    let ingested = state.hub.ingest(message).await?;
    metrics::record_submit(ingested.report, start.elapsed().as_secs_f64());
    metrics::set_active_channels(state.hub.broadcaster().stats().channel_count);

    Ok((StatusCode::CREATED, Json(ingested.message)).into_response())
}

/// Server-sent events stream handler.
async fn sse_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let channel_id = require_channel(query.channel_id)?;

    let session = state.hub.open_session(&channel_id).await?;
    let session_id = session.id().clone();
    debug!(session = %session_id, channel = %channel_id, "SSE stream opened");
    metrics::set_active_channels(state.hub.broadcaster().stats().channel_count);

    let guard = SessionMetricsGuard::new("sse");
    let events = session.into_stream().map(move |event| {
        let _guard = &guard;
        sse_event(&event)
    });

    let headers = [
        (header::CACHE_CONTROL, "no-cache, no-transform"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ];
    Ok((headers, Sse::new(events)).into_response())
}

fn sse_event(event: &StreamEvent) -> Result<Event, axum::Error> {
    Event::default().event(event.kind().as_str()).json_data(event)
}

/// WebSocket stream handler.
///
/// The channel is checked before the upgrade so an unknown channel gets a
/// plain 404 response.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let channel_id = require_channel(query.channel_id)?;

    let session = state.hub.open_session(&channel_id).await?;
    Ok(ws.on_upgrade(move |socket| handle_websocket(socket, session)))
}

/// Relay a session over a WebSocket until either side ends.
async fn handle_websocket(socket: WebSocket, mut session: StreamSession) {
    let _metrics_guard = SessionMetricsGuard::new("websocket");
    let session_id = session.id().clone();
    debug!(session = %session_id, "WebSocket stream opened");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = session.next_event() => {
                let Some(event) = event else {
                    break;
                };
                let data = match codec::encode(&event) {
                    Ok(data) => data,
                    Err(e) => {
                        error!(session = %session_id, error = %e, "Failed to encode event");
                        metrics::record_error("encode");
                        break;
                    }
                };
                if sender.send(WsMessage::Binary(data.to_vec())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!(session = %session_id, "Client closed WebSocket");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session = %session_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    // Streams are one-way, anything else from the client is ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    session.close();
    let _ = sender.send(WsMessage::Close(None)).await;
    debug!(session = %session_id, "WebSocket stream closed");
}
