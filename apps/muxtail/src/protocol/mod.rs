//! JSON wire frames for the live output channel.
//!
//! Outbound frames are tagged by `type`; inbound traffic is either a tagged
//! control frame (`heartbeat`/`pong`, liveness only) or an untagged data
//! frame carrying a full output snapshot. Malformed frames are dropped by the
//! transport without surfacing an error.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::session::Target;

/// Frames sent by the client over the live channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping { timestamp: u64 },
    SetRefreshRate { interval: f64 },
}

impl ClientFrame {
    /// A ping stamped with the current wall-clock time in milliseconds.
    pub fn ping_now() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        ClientFrame::Ping { timestamp }
    }

    pub fn encode(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

/// Liveness control frames. The server's timestamp field is ignored; receipt
/// alone refreshes the heartbeat clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Heartbeat,
    Pong,
}

/// A complete replacement of the visible output text. Never a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSnapshot {
    pub target: Target,
    pub content: String,
    pub timestamp: String,
}

/// Frames received over the live channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Control(ControlFrame),
    Snapshot(OutputSnapshot),
}

/// Parses an inbound text frame. Returns `None` for anything malformed.
pub fn parse_server_frame(text: &str) -> Option<ServerFrame> {
    serde_json::from_str(text).ok()
}
