//! WebSocket connection lifecycle: join, read loop, write loop, leave.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use drawsync_core::RoomId;

use crate::rooms::Frame;
use crate::state::RelayState;

/// Serve one client for its whole lifetime in `room`.
pub async fn handle_ws_connection(state: Arc<RelayState>, ws: WebSocket, room: RoomId) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, room = %room, "New WebSocket connection");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(state.config.member_queue.max(1));
    let ping_every = state.config.ping_interval();
    let idle = state.config.idle_timeout();

    state.rooms.join(&conn_id, room.clone(), frame_tx).await;

    // Forward room traffic to this client and keep it pinged. When the socket
    // stops accepting writes the receiver is dropped and the next broadcast
    // evicts us.
    let write_conn_id = conn_id.clone();
    let mut send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
        loop {
            let msg = tokio::select! {
                frame = frame_rx.recv() => match frame {
                    Some(frame) => Message::from(frame),
                    None => break,
                },
                _ = ping.tick() => Message::Ping(Bytes::new()),
            };
            match timeout(idle, ws_tx.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => break,
                Err(_) => {
                    warn!(conn_id = %write_conn_id, "Write stalled, dropping member");
                    break;
                }
            }
        }
        let _ = timeout(idle, ws_tx.close()).await;
    });

    let read_state = state.clone();
    let read_conn_id = conn_id.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            // Pongs count as traffic, so a live client never hits this.
            let msg_result = match timeout(idle, ws_rx.next()).await {
                Ok(Some(msg_result)) => msg_result,
                Ok(None) => break,
                Err(_) => {
                    info!(conn_id = %read_conn_id, ?idle, "Member idle, dropping");
                    break;
                }
            };
            let frame = match msg_result {
                Ok(Message::Text(text)) => Frame::Text(text),
                Ok(Message::Binary(data)) => Frame::Binary(data),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // Axum answers pings automatically
                    continue;
                }
                Ok(Message::Close(_)) => {
                    debug!(conn_id = %read_conn_id, "Client requested close");
                    break;
                }
                Err(e) => {
                    warn!(conn_id = %read_conn_id, %e, "WebSocket error");
                    break;
                }
            };

            let size = frame.len();
            let report = read_state.rooms.broadcast(&read_conn_id, frame).await;
            debug!(
                conn_id = %read_conn_id,
                size,
                delivered = report.delivered,
                skipped = report.skipped,
                evicted = report.evicted,
                "Relayed frame"
            );
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.rooms.leave(&conn_id).await;
    info!(conn_id = %conn_id, room = %room, "WebSocket connection closed");
}
