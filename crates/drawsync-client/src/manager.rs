//! Connection state machine, reconnect loop, and local fan-out.
//!
//! ```text
//! Disconnected -> Connecting -> Open -> Disconnected -> Connecting -> ...
//!                     |                      ^
//!                     +---- connect failed --+
//! ```
//!
//! A single supervisor task drives the machine, so at most one connection
//! attempt is ever in flight and at most one reconnect delay is pending.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drawsync_canvas::protocol::{self, Message};
use drawsync_core::config::ClientConfig;
use drawsync_core::RoomId;

use crate::backoff::Backoff;
use crate::transport::{Connector, Frame, Transport, WsConnector};

/// Where the link currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Teardown in progress.
    Closing,
}

/// State plus the number of reconnects scheduled since the last open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub retries: u32,
}

/// Something a peer in the room sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(Message),
    /// Binary frame, typically a raster canvas snapshot.
    Binary(Vec<u8>),
}

/// Why a send did not go out. Never fatal; callers decide whether to drop or retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,

    #[error("outbound queue full")]
    QueueFull,

    #[error("encode failed: {0}")]
    Encode(String),
}

/// Connection manager settings.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Relay WebSocket endpoint without the room parameter.
    pub url: String,
    pub room: RoomId,
    pub backoff: Backoff,
    pub heartbeat: Duration,
    pub outbound_queue: usize,
    /// Inbound messages buffered per subscriber before it starts missing some.
    pub subscriber_queue: usize,
}

impl ManagerOptions {
    pub fn new(url: impl Into<String>, room: RoomId) -> Self {
        Self {
            url: url.into(),
            room,
            backoff: Backoff::default(),
            heartbeat: Duration::from_secs(15),
            outbound_queue: 256,
            subscriber_queue: 1024,
        }
    }

    /// Relay URL carrying the room as a query parameter.
    pub fn endpoint(&self) -> String {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}room={}", self.url, self.room)
    }
}

impl From<&ClientConfig> for ManagerOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            url: config.url.clone(),
            room: config.room_id(),
            backoff: Backoff::from(config),
            heartbeat: config.heartbeat(),
            outbound_queue: config.outbound_queue,
            subscriber_queue: config.subscriber_queue,
        }
    }
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    senders: HashMap<u64, mpsc::Sender<Inbound>>,
}

struct Shared {
    options: ManagerOptions,
    status: watch::Sender<ConnectionStatus>,
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    subscribers: Mutex<Subscribers>,
    torn_down: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.send_modify(|s| s.state = state);
    }

    fn open(&self, tx: mpsc::Sender<Frame>) {
        *lock(&self.outbound) = Some(tx);
        self.status.send_modify(|s| {
            s.state = ConnectionState::Open;
            s.retries = 0;
        });
    }

    fn detach_outbound(&self) {
        lock(&self.outbound).take();
    }

    /// Schedule bookkeeping: returns the delay for this retry, then counts it.
    fn next_retry_delay(&self) -> Duration {
        let mut delay = Duration::ZERO;
        self.status.send_modify(|s| {
            delay = self.options.backoff.delay(s.retries);
            s.retries = s.retries.saturating_add(1);
        });
        delay
    }

    fn dispatch(&self, frame: Frame) {
        let inbound = match frame {
            Frame::Text(text) => match protocol::decode(&text, &self.options.room) {
                Some(message) => Inbound::Message(message),
                None => return,
            },
            Frame::Binary(data) => Inbound::Binary(data),
            Frame::Ping(_) | Frame::Pong(_) => return,
        };

        let mut subscribers = lock(&self.subscribers);
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }
        subscribers.senders.retain(|id, tx| match tx.try_send(inbound.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(subscriber = id, "Subscriber lagging, message dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// One relay connection for one room, reconnecting until torn down.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Manager over WebSocket.
    pub fn new(options: ManagerOptions) -> Self {
        Self::with_connector(options, Arc::new(WsConnector))
    }

    pub fn with_connector(options: ManagerOptions, connector: Arc<dyn Connector>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus {
            state: ConnectionState::Disconnected,
            retries: 0,
        });
        Self {
            shared: Arc::new(Shared {
                options,
                status,
                outbound: Mutex::new(None),
                subscribers: Mutex::new(Subscribers::default()),
                torn_down: AtomicBool::new(false),
            }),
            connector,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.shared.options.room
    }

    /// Start connecting. Reconnects automatically until [`teardown`](Self::teardown).
    ///
    /// Calling this while the manager is already running, or after teardown,
    /// does nothing. Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        if self.shared.torn_down.load(Ordering::SeqCst) {
            return;
        }
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        *task = Some(tokio::spawn(supervise(
            self.shared.clone(),
            self.connector.clone(),
            self.cancel.clone(),
        )));
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Follow state changes, e.g. to drive a connectivity indicator.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Encode and queue a message. Fails without side effects unless the link is open.
    pub fn send(&self, message: &Message) -> Result<(), SendError> {
        let text = protocol::encode(message).map_err(|e| SendError::Encode(e.to_string()))?;
        self.send_frame(Frame::Text(text))
    }

    /// Queue a binary frame, e.g. a raster snapshot.
    pub fn send_binary(&self, data: Vec<u8>) -> Result<(), SendError> {
        self.send_frame(Frame::Binary(data))
    }

    fn send_frame(&self, frame: Frame) -> Result<(), SendError> {
        if self.state() != ConnectionState::Open {
            return Err(SendError::NotConnected);
        }
        let outbound = lock(&self.shared.outbound);
        let tx = outbound.as_ref().ok_or(SendError::NotConnected)?;
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::NotConnected,
        })
    }

    /// Receive every inbound message from now on, in arrival order.
    ///
    /// Each subscription gets its own copy; dropping it unsubscribes. A
    /// subscription that falls `subscriber_queue` messages behind misses the
    /// overflow rather than buffering without bound.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.shared.options.subscriber_queue.max(1));
        let mut subscribers = lock(&self.shared.subscribers);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        if !self.shared.torn_down.load(Ordering::SeqCst) {
            subscribers.senders.insert(id, tx);
        }
        Subscription {
            id,
            rx,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.subscribers).senders.len()
    }

    /// Close the link, cancel any pending reconnect, and detach all
    /// subscribers. Nothing is delivered and no reconnect is attempted after
    /// this returns.
    pub async fn teardown(&self) {
        if self.shared.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.shared.set_state(ConnectionState::Closing);

        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(%e, "Connection task ended abnormally");
            }
        }

        lock(&self.shared.subscribers).senders.clear();
        self.shared.detach_outbound();
        self.shared.set_state(ConnectionState::Disconnected);
        info!(room = %self.shared.options.room, "Connection manager torn down");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // No executor to await a graceful close here; stop the supervisor outright.
        self.shared.torn_down.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

/// Handle to an inbound message stream. Dropping it deregisters the listener.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Inbound>,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Next inbound message, or `None` once the manager is torn down.
    pub async fn recv(&mut self) -> Option<Inbound> {
        if !self.is_live() {
            return None;
        }
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Inbound> {
        if !self.is_live() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    fn is_live(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|s| !s.torn_down.load(Ordering::SeqCst))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.subscribers).senders.remove(&self.id);
        }
    }
}

/// The reconnect loop. Runs until `cancel` fires.
async fn supervise(shared: Arc<Shared>, connector: Arc<dyn Connector>, cancel: CancellationToken) {
    let url = shared.options.endpoint();

    loop {
        shared.set_state(ConnectionState::Connecting);
        debug!(url = %url, "Connecting");

        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = connector.connect(&url) => attempt,
        };

        match attempt {
            Ok(transport) => {
                let (tx, rx) = mpsc::channel(shared.options.outbound_queue.max(1));
                shared.open(tx);
                info!(url = %url, "Connected");

                let reason = run_session(&shared, transport, rx, &cancel).await;
                shared.detach_outbound();
                if cancel.is_cancelled() {
                    break;
                }
                warn!(url = %url, %reason, "Connection lost");
            }
            Err(e) => warn!(url = %url, %e, "Connect failed"),
        }

        shared.set_state(ConnectionState::Disconnected);
        let delay = shared.next_retry_delay();
        debug!(?delay, retries = shared.status().retries, "Reconnect scheduled");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.detach_outbound();
    debug!("Connection supervisor stopped");
}

/// Pump one open link until it fails, goes silent, stalls, or is cancelled.
/// Returns a description of why it ended.
///
/// Every await in here either races `cancel` or is bounded, so a peer that
/// stops reading can't pin the loop.
async fn run_session(
    shared: &Shared,
    mut transport: Box<dyn Transport>,
    mut outbound: mpsc::Receiver<Frame>,
    cancel: &CancellationToken,
) -> String {
    let heartbeat = shared.options.heartbeat;
    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
    let mut last_seen = Instant::now();

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                flush(&mut *transport, &mut outbound).await;
                break "torn down".to_string();
            }

            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break "outbound queue closed".to_string();
                };
                if let Err(reason) = send_within(&mut *transport, frame, heartbeat, cancel).await {
                    break reason;
                }
            }

            incoming = transport.recv() => match incoming {
                Some(Ok(frame)) => {
                    last_seen = Instant::now();
                    shared.dispatch(frame);
                }
                Some(Err(e)) => break format!("receive failed: {e}"),
                None => break "closed by relay".to_string(),
            },

            _ = ticker.tick() => {
                if last_seen.elapsed() >= heartbeat * 2 {
                    break "heartbeat timeout".to_string();
                }
                let ping = Frame::Ping(Vec::new());
                if let Err(reason) = send_within(&mut *transport, ping, heartbeat, cancel).await {
                    break reason;
                }
            }
        }
    };

    close_within(&mut *transport).await;
    reason
}

/// Send one frame, giving up after `limit` or as soon as `cancel` fires.
async fn send_within(
    transport: &mut dyn Transport,
    frame: Frame,
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<(), String> {
    tokio::select! {
        _ = cancel.cancelled() => Err("torn down".into()),
        sent = tokio::time::timeout(limit, transport.send(frame)) => match sent {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("send failed: {e}")),
            Err(_) => Err("send stalled".into()),
        },
    }
}

async fn close_within(transport: &mut dyn Transport) {
    if tokio::time::timeout(CLOSE_TIMEOUT, transport.close()).await.is_err() {
        debug!("Transport close timed out");
    }
}

/// Frames accepted by `send` before teardown still go out, within a bound.
async fn flush(transport: &mut dyn Transport, outbound: &mut mpsc::Receiver<Frame>) {
    outbound.close();
    let drain = async {
        while let Some(frame) = outbound.recv().await {
            if transport.send(frame).await.is_err() {
                break;
            }
        }
    };
    if tokio::time::timeout(FLUSH_TIMEOUT, drain).await.is_err() {
        debug!("Dropped unsent frames on teardown");
    }
}

const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
