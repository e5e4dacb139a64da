//! Relay integration tests — start a real relay and interact via WS + HTTP.
//!
//! Run with: `cargo test -p drawsync-relay --test integration`

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use drawsync_core::config::RelayConfig;
use drawsync_core::RoomId;
use drawsync_relay::RelayState;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a relay on an ephemeral port and return its state + port.
async fn start_test_relay() -> (Arc<RelayState>, u16) {
    start_test_relay_with(RelayConfig::default()).await
}

async fn start_test_relay_with(config: RelayConfig) -> (Arc<RelayState>, u16) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let config = RelayConfig {
        bind: "127.0.0.1".into(),
        port,
        ..config
    };
    let state = Arc::new(RelayState::new(config));

    let state_clone = state.clone();
    tokio::spawn(async move {
        let _ = drawsync_relay::serve(listener, state_clone, std::future::pending()).await;
    });

    (state, port)
}

async fn connect(port: u16, query: &str) -> Ws {
    let url = format!("ws://127.0.0.1:{port}/ws{query}");
    let (ws, _) = connect_async(&url).await.expect("WS connect failed");
    ws
}

/// Wait until the relay has registered `expected` connections.
async fn wait_for_connections(state: &RelayState, expected: usize) {
    for _ in 0..100 {
        if state.rooms.connection_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} connections, have {}",
        state.rooms.connection_count().await
    );
}

async fn next_text(ws: &mut Ws) -> serde_json::Value {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for frame")
        .unwrap()
        .unwrap();
    serde_json::from_str(msg.to_text().unwrap()).unwrap()
}

async fn assert_silent(ws: &mut Ws) {
    let res = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(res.is_err(), "expected no frame, got {res:?}");
}

fn draw(room: &str, x: f64, drag: bool) -> Message {
    let body = json!({
        "type": "draw", "room": room, "x": x, "y": 0.5,
        "drag": drag, "color": "#123456", "size": 4
    });
    Message::Text(body.to_string().into())
}

#[tokio::test]
async fn test_health_endpoint() {
    let (state, port) = start_test_relay().await;
    let _ws = connect(port, "?room=r1").await;
    wait_for_connections(&state, 1).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .expect("Health request failed");

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert_eq!(body["rooms"], 1);
    assert_eq!(body["connections"], 1);
}

#[tokio::test]
async fn test_draw_stroke_stays_in_room() {
    let (state, port) = start_test_relay().await;
    let mut sender = connect(port, "?room=r1").await;
    let mut peer = connect(port, "?room=r1").await;
    let mut outsider = connect(port, "?room=r2").await;
    wait_for_connections(&state, 3).await;

    sender.send(draw("r1", 0.1, false)).await.unwrap();
    sender.send(draw("r1", 0.2, true)).await.unwrap();
    sender.send(draw("r1", 0.3, true)).await.unwrap();

    let first = next_text(&mut peer).await;
    let second = next_text(&mut peer).await;
    let third = next_text(&mut peer).await;
    assert_eq!(first["drag"], false);
    assert_eq!(first["x"], 0.1);
    assert_eq!(second["x"], 0.2);
    assert_eq!(third["x"], 0.3);
    assert_eq!(third["drag"], true);

    assert_silent(&mut outsider).await;
    assert_silent(&mut sender).await;
}

#[tokio::test]
async fn test_payloads_are_not_interpreted() {
    let (state, port) = start_test_relay().await;
    let mut a = connect(port, "?room=raw").await;
    let mut b = connect(port, "?room=raw").await;
    wait_for_connections(&state, 2).await;

    // not drawing JSON at all, still relayed verbatim
    a.send(Message::Text("just some text {".into())).await.unwrap();
    let msg = tokio::time::timeout(Duration::from_secs(2), b.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(msg.to_text().unwrap(), "just some text {");

    let raster: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
    a.send(Message::Binary(raster.clone().into())).await.unwrap();
    let msg = tokio::time::timeout(Duration::from_secs(2), b.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match msg {
        Message::Binary(data) => assert_eq!(data.as_ref(), raster.as_slice()),
        other => panic!("expected binary frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_or_malformed_room_uses_default() {
    let (state, port) = start_test_relay().await;
    let mut plain = connect(port, "").await;
    let mut spaced = connect(port, "?room=bad%20room").await;
    let mut empty = connect(port, "?room=").await;
    wait_for_connections(&state, 3).await;

    let default_room = RoomId::default();
    assert_eq!(state.rooms.member_count(&default_room).await, 3);
    assert_eq!(state.rooms.room_count().await, 1);

    let prompt = json!({"type": "prompt", "payload": "neon city"}).to_string();
    plain.send(Message::Text(prompt.into())).await.unwrap();
    assert_eq!(next_text(&mut spaced).await["payload"], "neon city");
    assert_eq!(next_text(&mut empty).await["payload"], "neon city");
}

#[tokio::test]
async fn test_member_disconnect_mid_session() {
    let (state, port) = start_test_relay().await;
    let mut sender = connect(port, "?room=r1").await;
    let leaver = connect(port, "?room=r1").await;
    let mut stayer = connect(port, "?room=r1").await;
    wait_for_connections(&state, 3).await;

    drop(leaver);
    sender.send(draw("r1", 0.4, false)).await.unwrap();
    sender.send(draw("r1", 0.5, true)).await.unwrap();

    assert_eq!(next_text(&mut stayer).await["x"], 0.4);
    assert_eq!(next_text(&mut stayer).await["x"], 0.5);

    wait_for_connections(&state, 2).await;
    assert_eq!(state.rooms.member_count(&RoomId::parse(Some("r1"))).await, 2);
}

#[tokio::test]
async fn test_room_destroyed_after_last_leave() {
    let (state, port) = start_test_relay().await;
    let mut a = connect(port, "?room=ephemeral").await;
    let b = connect(port, "?room=ephemeral").await;
    wait_for_connections(&state, 2).await;
    assert_eq!(state.rooms.room_count().await, 1);

    a.close(None).await.ok();
    drop(b);
    wait_for_connections(&state, 0).await;
    assert_eq!(state.rooms.room_count().await, 0);

    let mut fresh = connect(port, "?room=ephemeral").await;
    wait_for_connections(&state, 1).await;
    let room = RoomId::parse(Some("ephemeral"));
    assert_eq!(state.rooms.member_count(&room).await, 1);

    fresh.send(draw("ephemeral", 0.1, false)).await.unwrap();
    assert_silent(&mut fresh).await;
}

#[tokio::test]
async fn test_silent_member_dropped_after_idle_timeout() {
    let (state, port) = start_test_relay_with(RelayConfig {
        ping_interval_ms: 100,
        idle_timeout_ms: 400,
        ..RelayConfig::default()
    })
    .await;

    // Never reads, so never answers the relay's pings.
    let _silent = connect(port, "?room=idle").await;
    let mut chatty = connect(port, "?room=idle").await;
    wait_for_connections(&state, 2).await;

    let keepalive = tokio::spawn(async move {
        for _ in 0..20 {
            if chatty.send(Message::Ping(Vec::new().into())).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        chatty
    });

    wait_for_connections(&state, 1).await;
    let room = RoomId::parse(Some("idle"));
    assert_eq!(state.rooms.member_count(&room).await, 1);

    let _chatty = keepalive.await.unwrap();
    assert_eq!(state.rooms.room_count().await, 1);
}
