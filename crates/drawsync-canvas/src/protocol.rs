//! Drawing protocol: wire messages, coordinate normalization, stroke assembly.
//!
//! Coordinates on the wire are fractions of the canvas extent in `[0, 1]`, so
//! every viewer renders the same drawing regardless of its own resolution or
//! device pixel ratio.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use drawsync_core::{DrawSyncError, RoomId};

/// Brush or eraser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeMode {
    #[default]
    Brush,
    Eraser,
}

/// A point expressed as a fraction of canvas width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    /// Returns `None` unless both coordinates are finite and within `[0, 1]`.
    pub fn new(x: f64, y: f64) -> Option<Self> {
        (is_unit(x) && is_unit(y)).then_some(Self { x, y })
    }
}

fn is_unit(v: f64) -> bool {
    v.is_finite() && (0.0..=1.0).contains(&v)
}

/// Rendered size of a canvas in device pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasExtent {
    pub width: f64,
    pub height: f64,
}

impl CanvasExtent {
    /// Returns `None` for empty or non-finite extents, which cannot be normalized against.
    pub fn new(width: f64, height: f64) -> Option<Self> {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        (ok(width) && ok(height)).then_some(Self { width, height })
    }

    /// Device pixel position to normalized coordinates. Pointer positions
    /// outside the canvas are clamped to its edge.
    pub fn normalize(&self, px: f64, py: f64) -> NormalizedPoint {
        let clamp = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        NormalizedPoint {
            x: clamp(px / self.width),
            y: clamp(py / self.height),
        }
    }

    /// Normalized coordinates back to device pixels on this canvas.
    pub fn denormalize(&self, point: NormalizedPoint) -> (f64, f64) {
        (point.x * self.width, point.y * self.height)
    }
}

/// Color, size and mode shared by every point of a stroke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    pub color: String,
    pub size: f64,
    #[serde(default)]
    pub mode: StrokeMode,
}

/// One incremental sample of a stroke in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawEvent {
    pub room: RoomId,
    pub x: f64,
    pub y: f64,
    /// `false` starts a stroke, `true` continues the previous one.
    pub drag: bool,
    pub color: String,
    pub size: f64,
    #[serde(default)]
    pub mode: StrokeMode,
}

impl DrawEvent {
    pub fn point(&self) -> NormalizedPoint {
        NormalizedPoint {
            x: self.x,
            y: self.y,
        }
    }

    fn is_valid(&self) -> bool {
        is_unit(self.x) && is_unit(self.y) && self.size.is_finite() && self.size > 0.0
    }
}

/// A point of a completed stroke with pen pressure and capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    pub x: f64,
    pub y: f64,
    /// Pressure in `[0, 1]`; mice report 0.5.
    pub p: f64,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<i64>,
}

/// A completed pen gesture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: String,
    pub color: String,
    pub size: f64,
    pub points: Vec<StrokePoint>,
    #[serde(default)]
    pub mode: StrokeMode,
}

impl Stroke {
    fn is_valid(&self) -> bool {
        !self.id.is_empty()
            && !self.points.is_empty()
            && self.size.is_finite()
            && self.size > 0.0
            && self
                .points
                .iter()
                .all(|pt| is_unit(pt.x) && is_unit(pt.y) && is_unit(pt.p))
    }
}

/// Every message exchanged between peers in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// Incremental stroke sample.
    Draw(DrawEvent),
    /// Completed stroke.
    Stroke { payload: Stroke },
    /// Full raster snapshot; the payload is opaque to the protocol.
    Canvas { payload: serde_json::Value },
    /// Free-text directive for the visual-synthesis consumer.
    Prompt { payload: String },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Draw(_) => "draw",
            Message::Stroke { .. } => "stroke",
            Message::Canvas { .. } => "canvas",
            Message::Prompt { .. } => "prompt",
        }
    }
}

/// Serialize a message for the wire.
pub fn encode(message: &Message) -> drawsync_core::Result<String> {
    serde_json::to_string(message).map_err(|e| DrawSyncError::Codec(e.to_string()))
}

/// Parse an inbound text frame.
///
/// Never fails: anything malformed, out of range, or addressed to a different
/// room yields `None`.
pub fn decode(text: &str, room: &RoomId) -> Option<Message> {
    let message = match serde_json::from_str::<Message>(text) {
        Ok(m) => m,
        Err(e) => {
            debug!(%e, "Dropping malformed message");
            return None;
        }
    };

    let keep = match &message {
        Message::Draw(draw) => draw.room == *room && draw.is_valid(),
        Message::Stroke { payload } => payload.is_valid(),
        Message::Canvas { .. } | Message::Prompt { .. } => true,
    };

    if !keep {
        debug!(kind = message.kind(), room = %room, "Dropping invalid or foreign message");
        return None;
    }
    Some(message)
}

/// Fresh stroke identifier, unique per originating session.
pub fn new_stroke_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builds a local stroke, emitting `draw` events as it grows.
#[derive(Debug)]
pub struct StrokeBuilder {
    room: RoomId,
    style: StrokeStyle,
    id: String,
    points: Vec<StrokePoint>,
}

impl StrokeBuilder {
    /// Start a stroke at `point`. Returns the builder and the initial
    /// `drag=false` event.
    pub fn begin(
        room: RoomId,
        style: StrokeStyle,
        point: NormalizedPoint,
        pressure: f64,
    ) -> (Self, DrawEvent) {
        let mut builder = Self {
            room,
            style,
            id: new_stroke_id(),
            points: Vec::new(),
        };
        let event = builder.record(point, pressure, false);
        (builder, event)
    }

    /// Continue the stroke. Returns the `drag=true` event.
    pub fn extend(&mut self, point: NormalizedPoint, pressure: f64) -> DrawEvent {
        self.record(point, pressure, true)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Close the stroke into its completed form.
    pub fn finish(self) -> Stroke {
        Stroke {
            id: self.id,
            color: self.style.color,
            size: self.style.size,
            points: self.points,
            mode: self.style.mode,
        }
    }

    fn record(&mut self, point: NormalizedPoint, pressure: f64, drag: bool) -> DrawEvent {
        let p = if pressure.is_finite() {
            pressure.clamp(0.0, 1.0)
        } else {
            0.5
        };
        self.points.push(StrokePoint {
            x: point.x,
            y: point.y,
            p,
            t: Some(Utc::now().timestamp_millis()),
        });
        DrawEvent {
            room: self.room.clone(),
            x: point.x,
            y: point.y,
            drag,
            color: self.style.color.clone(),
            size: self.style.size,
            mode: self.style.mode,
        }
    }
}

/// A line piece ready to render.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub from: NormalizedPoint,
    pub to: NormalizedPoint,
    pub color: String,
    pub size: f64,
    pub mode: StrokeMode,
}

/// Receiver-side reconstruction of polylines from `draw` events.
#[derive(Debug, Default)]
pub struct PolylineAssembler {
    last: Option<NormalizedPoint>,
}

impl PolylineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next event. Returns the segment joining it to the previous
    /// point of the same stroke, or `None` when it starts a stroke.
    pub fn feed(&mut self, event: &DrawEvent) -> Option<Segment> {
        let point = event.point();
        let previous = self.last.replace(point);
        if !event.drag {
            return None;
        }
        previous.map(|from| Segment {
            from,
            to: point,
            color: event.color.clone(),
            size: event.size,
            mode: event.mode,
        })
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
