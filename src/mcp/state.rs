use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    /// Alive but the last handshake or discovery failed, or the server sent
    /// traffic we could not understand. Calls fail fast.
    Degraded,
    Closed,
}

impl ConnectionState {
    pub fn is_ready(self) -> bool {
        self == ConnectionState::Ready
    }

    /// Degraded or closed: not usable until started again
    pub fn needs_restart(self) -> bool {
        matches!(self, ConnectionState::Degraded | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Ready => "ready",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}
