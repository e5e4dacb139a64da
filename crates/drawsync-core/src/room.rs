//! Room identifiers.
//!
//! A room is a logical broadcast domain. Clients name it through the `?room=`
//! query parameter; anything absent or malformed lands in [`RoomId::DEFAULT`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Longest room name accepted before falling back to the default room.
pub const MAX_ROOM_ID_LEN: usize = 64;

/// Validated room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub const DEFAULT: &'static str = "default";

    /// Normalize a raw room name, falling back to the default room when the
    /// value is missing, empty, too long, or uses characters outside
    /// `[A-Za-z0-9_.-]`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(name) if is_valid(name) => Self(name.to_string()),
            _ => Self::default(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

fn is_valid(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_ROOM_ID_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl Default for RoomId {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
