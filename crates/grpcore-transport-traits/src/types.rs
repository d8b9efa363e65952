//! Core transport types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a logical stream within one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(u32);

impl StreamId {
    /// Create a stream id from its numeric value.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the numeric value.
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents the current state of a multiplexed connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Open and accepting new logical streams.
    Open,
    /// Half-closed: no new streams, existing streams run to completion.
    Draining,
    /// Closed; every stream has been released.
    Closed,
    /// The connection has encountered an unrecoverable error.
    Failed {
        /// A description of the failure reason.
        reason: String,
    },
}

impl ConnectionState {
    /// Returns `true` if new logical streams may be opened.
    pub const fn accepts_streams(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Draining => write!(f, "draining"),
            Self::Closed => write!(f, "closed"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// A host/port pair to dial.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The `host:port` form used as the default `:authority`.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_accepts_streams() {
        assert!(ConnectionState::Open.accepts_streams());
        assert!(!ConnectionState::Draining.accepts_streams());
        assert!(!ConnectionState::Closed.accepts_streams());
    }

    #[test]
    fn test_endpoint_authority() {
        assert_eq!(Endpoint::new("localhost", 50051).authority(), "localhost:50051");
        assert_eq!(Endpoint::new("::1", 443).authority(), "[::1]:443");
        assert_eq!(Endpoint::new("[::1]", 443).authority(), "[::1]:443");
    }

    #[test]
    fn test_state_display() {
        let failed = ConnectionState::Failed {
            reason: "goaway".into(),
        };
        assert_eq!(failed.to_string(), "failed: goaway");
    }
}
