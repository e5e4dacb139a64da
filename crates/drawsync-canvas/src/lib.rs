//! Shared canvas model: the drawing wire protocol and the undo/redo history.
//!
//! Nothing here touches the network. The relay never parses these types; only
//! clients encode and decode them.

pub mod history;
pub mod protocol;

pub use history::History;
pub use protocol::{
    decode, encode, CanvasExtent, DrawEvent, Message, NormalizedPoint, PolylineAssembler, Segment,
    Stroke, StrokeBuilder, StrokeMode, StrokePoint, StrokeStyle,
};
