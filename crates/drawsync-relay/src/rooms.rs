//! Room registry: room-scoped fan-out of opaque frames.
//!
//! The registry never looks inside a frame. Text and binary frames share one
//! path and are delivered verbatim to every other member of the sender's room.

use std::collections::HashMap;
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use drawsync_core::RoomId;

/// Opaque connection identifier.
pub type ConnId = String;

/// A relayed WebSocket payload. Clones are reference-counted.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(Utf8Bytes),
    Binary(Bytes),
}

impl Frame {
    pub fn text(text: impl Into<String>) -> Self {
        Frame::Text(Utf8Bytes::from(text.into()))
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Frame::Binary(data.into())
    }

    pub fn len(&self) -> usize {
        match self {
            Frame::Text(t) => t.as_str().len(),
            Frame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(t) => Message::Text(t),
            Frame::Binary(b) => Message::Binary(b),
        }
    }
}

/// Outcome of a single broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the frame was queued for.
    pub delivered: usize,
    /// Members whose queue was full; they miss this frame only.
    pub skipped: usize,
    /// Members whose queue was closed; they were removed from the room.
    pub evicted: usize,
}

type Members = HashMap<ConnId, mpsc::Sender<Frame>>;

/// Member lists are only touched in short synchronous sections and never
/// held across an await, so a plain std lock is enough.
struct Room {
    members: std::sync::RwLock<Members>,
}

impl Room {
    fn new() -> Self {
        Self {
            members: std::sync::RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Members> {
        self.members.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Members> {
        self.members.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Default)]
struct Rooms {
    by_id: HashMap<RoomId, Arc<Room>>,
    /// Which room each connection belongs to.
    index: HashMap<ConnId, RoomId>,
}

/// All live rooms and their members.
///
/// Membership changes hold the registry lock without awaiting anything else;
/// broadcasts only hold the target room's member lock, and only while
/// queueing with `try_send`. Work in one room never parks another room.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<Rooms>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn_id` in `room`, creating the room if needed.
    ///
    /// A connection belongs to one room for its whole lifetime: joining again
    /// is a no-op and returns `false`.
    pub async fn join(&self, conn_id: &str, room: RoomId, tx: mpsc::Sender<Frame>) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(existing) = rooms.index.get(conn_id) {
            debug!(conn_id, room = %existing, "Connection already joined");
            return false;
        }

        let entry = rooms
            .by_id
            .entry(room.clone())
            .or_insert_with(|| {
                info!(room = %room, "Room created");
                Arc::new(Room::new())
            })
            .clone();
        entry.write().insert(conn_id.to_string(), tx);
        rooms.index.insert(conn_id.to_string(), room);
        true
    }

    /// Remove `conn_id` from its room, deleting the room once it is empty.
    /// Returns the room it left, or `None` if it was not a member.
    pub async fn leave(&self, conn_id: &str) -> Option<RoomId> {
        let mut rooms = self.rooms.write().await;
        let room_id = rooms.index.remove(conn_id)?;

        let now_empty = match rooms.by_id.get(&room_id) {
            Some(room) => {
                let mut members = room.write();
                members.remove(conn_id);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            rooms.by_id.remove(&room_id);
            info!(room = %room_id, "Room closed");
        }
        Some(room_id)
    }

    /// Deliver `frame` to every other member of the sender's room.
    ///
    /// Sends never wait: a member with a full queue is skipped, a member whose
    /// queue is closed is evicted. Neither affects delivery to the rest.
    pub async fn broadcast(&self, from: &str, frame: Frame) -> BroadcastReport {
        let room = {
            let rooms = self.rooms.read().await;
            rooms
                .index
                .get(from)
                .and_then(|id| rooms.by_id.get(id))
                .cloned()
        };
        let Some(room) = room else {
            debug!(conn_id = from, "Broadcast from unregistered connection");
            return BroadcastReport::default();
        };

        let mut report = BroadcastReport::default();
        let mut dead = Vec::new();
        {
            let members = room.read();
            for (id, tx) in members.iter().filter(|(id, _)| id.as_str() != from) {
                match tx.try_send(frame.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => report.skipped += 1,
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(id.clone()),
                }
            }
        }

        for id in dead {
            if self.leave(&id).await.is_some() {
                debug!(conn_id = %id, "Evicted closed member");
                report.evicted += 1;
            }
        }
        report
    }

    pub async fn room_of(&self, conn_id: &str) -> Option<RoomId> {
        self.rooms.read().await.index.get(conn_id).cloned()
    }

    /// Number of members in `room`; zero if the room does not exist.
    pub async fn member_count(&self, room: &RoomId) -> usize {
        let entry = self.rooms.read().await.by_id.get(room).cloned();
        match entry {
            Some(room) => room.read().len(),
            None => 0,
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.by_id.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.rooms.read().await.index.len()
    }
}
