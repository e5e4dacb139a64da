//! Axum-based WebSocket server.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use drawsync_core::{DrawSyncError, RoomId};

use crate::connection::handle_ws_connection;
use crate::state::RelayState;

#[derive(Debug, Deserialize)]
struct RoomQuery {
    room: Option<String>,
}

/// Start the relay on the configured address and run until Ctrl-C.
pub async fn start_relay(state: Arc<RelayState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.bind, state.config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DrawSyncError::Relay(format!("cannot bind {addr}: {e}")))?;
    info!("Relay listening on {addr}");

    serve(listener, state, shutdown_signal()).await
}

/// Serve the relay on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: Arc<RelayState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// `/ws?room=<id>` for peers and `/health` for probes.
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    query: Result<Query<RoomQuery>, QueryRejection>,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    // An unparsable query string joins the default room instead of failing the upgrade
    let raw_room = query.ok().and_then(|Query(q)| q.room);
    let room = RoomId::parse(raw_room.as_deref());

    ws.max_message_size(state.config.max_message_bytes)
        .on_upgrade(move |socket| handle_ws_connection(state, socket, room))
}

async fn health_handler(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": state.rooms.room_count().await,
        "connections": state.rooms.connection_count().await,
    }))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!(%e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    }
}
