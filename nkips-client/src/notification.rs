//! Notifications published by a session.

use nkips_core::CrossPointState;
use serde::Serialize;

/// Event published on the session's broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Notification {
    /// A full routing table was received and applied.
    Ready,
    /// A destination changed; carries its composed view.
    Crosspoint(CrossPointState),
    /// The socket closed.
    Closed,
    /// The socket failed.
    Error(String),
}

impl Notification {
    /// Short name used in logs and the CLI.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Ready => "ready",
            Notification::Crosspoint(_) => "crosspoint",
            Notification::Closed => "closed",
            Notification::Error(_) => "error",
        }
    }
}
