//! Transport error types.

use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Represents errors that can occur on a multiplexed connection or one of its
/// logical streams.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection was lost. Fatal to every open stream.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The connection is draining or closed and refuses new logical streams.
    #[error("Connection closed to new streams")]
    ConnectionClosed,

    /// The peer (or the local side) aborted a single logical stream.
    #[error("Stream reset: {0}")]
    StreamReset(String),

    /// Failed to send headers or data on a logical stream.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive from a logical stream.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// A protocol-level error occurred.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Connection establishment timed out.
    #[error("Connection timed out after {timeout:?} connecting to {endpoint}")]
    ConnectionTimeout {
        /// The endpoint that was being dialed
        endpoint: String,
        /// The timeout duration that was exceeded
        timeout: Duration,
    },

    /// The transport was configured with invalid parameters.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// TLS negotiation or certificate validation failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransportError {
    /// Returns `true` if the error is fatal to the whole connection rather
    /// than to a single logical stream.
    pub const fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::ConnectionLost(_)
                | Self::ConnectionTimeout { .. }
                | Self::Io(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
