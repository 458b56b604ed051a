//! Observable broker connection state.
//!
//! `Connecting -> Connected -> Disconnected -> Reconnecting -> Connecting ...`
//! The connection kernel publishes transitions on a `watch` channel.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// CONNECT sent, waiting for CONNACK.
    Connecting,
    /// CONNACK accepted; publishes are delivered.
    Connected,
    /// Connection lost or refused, with the reason.
    Disconnected(String),
    /// Waiting the given number of seconds before the next attempt.
    Reconnecting(f64),
    /// Kernel stopped after DISCONNECT.
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
            ConnectionState::Closed => "Closed",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// No further transitions will happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected(reason) => write!(f, "Disconnected ({reason})"),
            ConnectionState::Reconnecting(secs) => write!(f, "Reconnecting (in {secs:.1} seconds)"),
            other => f.write_str(other.as_str()),
        }
    }
}
