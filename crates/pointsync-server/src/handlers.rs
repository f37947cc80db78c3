//! HTTP and WebSocket handlers for the pointsync server.
//!
//! This module accepts connections, applies the admission checks that run
//! before an upgrade, and hands each upgraded socket to a core session.

use crate::config::Config;
use crate::metrics;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use pointsync_core::{Hub, Session};
use pointsync_transport::{origin, websocket, Connection, OriginPolicy};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

/// How often hub sizes are pushed to the metrics gauges.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// The hub every session works through.
    pub hub: Arc<Hub>,
    /// Decides which origins may open a WebSocket.
    pub origin_policy: Arc<dyn OriginPolicy>,
    /// Server configuration.
    pub config: Config,
    /// Upgrades admitted under `max_connections` and not yet finished.
    slots: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        let hub = Hub::with_config(config.hub_config()).context("Failed to create hub")?;
        let origin_policy = origin::from_allow_list(&config.transport.allowed_origins);

        Ok(Self {
            hub: Arc::new(hub),
            origin_policy,
            config,
            slots: AtomicUsize::new(0),
        })
    }

    /// Connections currently holding a slot, including upgrades in flight.
    #[must_use]
    pub fn reserved_connections(&self) -> usize {
        self.slots.load(Ordering::SeqCst)
    }

    /// Claim one of the `max_connections` slots.
    ///
    /// The slot is taken before the upgrade, so concurrent handshakes cannot
    /// overshoot the limit. It is released when the returned guard drops.
    fn reserve_slot(self: &Arc<Self>) -> Option<ConnectionSlot> {
        let max = self.config.limits.max_connections;
        self.slots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(ConnectionSlot {
            state: Arc::clone(self),
        })
    }
}

/// A place under `max_connections`, held from admission until the session
/// ends or the upgrade is abandoned.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.slots.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    if config.metrics.enabled {
        match metrics::start_metrics_server(config.metrics.port) {
            Ok(()) => spawn_stats_reporter(Arc::clone(&state.hub)),
            Err(e) => error!("Failed to start metrics server: {}", e),
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("pointsync server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, state).await
}

/// Serve on an already-bound listener.
///
/// # Errors
///
/// Returns an error if the server stops with an I/O error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler));

    if let Some(dir) = &state.config.transport.static_dir {
        info!(dir = %dir, "Serving static assets");
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.with_state(state)
}

fn spawn_stats_reporter(hub: Arc<Hub>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        loop {
            ticker.tick().await;
            metrics::record_hub_stats(hub.stats());
        }
    });
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "points": stats.points,
        "connections": stats.connections,
        "startTime": state.hub.start_time(),
    }))
}

/// WebSocket upgrade handler.
///
/// Origin and capacity checks happen here, before the upgrade, so a refused
/// connection never reaches the registry.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());

    if !state.origin_policy.allows(origin) {
        warn!(remote = %remote, origin = ?origin, "Rejected connection from disallowed origin");
        metrics::record_rejection("origin");
        return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }

    let Some(slot) = state.reserve_slot() else {
        warn!(remote = %remote, "Rejected connection, server full");
        metrics::record_rejection("capacity");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_failed_upgrade(move |e| {
            warn!(remote = %remote, error = %e, "WebSocket handshake failed");
            metrics::record_handshake_failure();
        })
        .on_upgrade(move |socket| handle_websocket(socket, remote, state, slot))
}

/// Handle an upgraded WebSocket until its session ends.
async fn handle_websocket(
    socket: WebSocket,
    remote: SocketAddr,
    state: Arc<AppState>,
    slot: ConnectionSlot,
) {
    metrics::record_connection();

    let (connection, inbound) = websocket::split(
        socket,
        Some(remote),
        state.config.limits.max_message_size,
    );
    let connection_id = connection.id().clone();
    debug!(connection = %connection_id, remote = %remote, "WebSocket connected");

    let session = Session::new(Arc::clone(&state.hub), connection);
    let final_state = session.run(inbound).await;

    drop(slot);
    metrics::record_hub_stats(state.hub.stats());
    debug!(connection = %connection_id, state = ?final_state, "WebSocket disconnected");
}
