//! Error types for the gRPC engine
//!
//! Every engine failure maps onto one canonical [`Status`] through
//! `From<GrpcError> for Status`; no ad hoc codes are produced.

use thiserror::Error;

use grpcore_transport_traits::TransportError;

use crate::code::Code;
use crate::frame::FrameError;
use crate::status::Status;

/// Result type for engine operations
pub type GrpcResult<T> = Result<T, GrpcError>;

/// Error type for engine operations
#[derive(Debug, Error)]
pub enum GrpcError {
    /// Malformed length-prefixed framing
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// Failure reported by the underlying connection
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A status produced by application code or the peer
    #[error("{0}")]
    Status(#[from] Status),

    /// A compressed message used an encoding this side cannot decode
    #[error("unsupported message encoding: {0}")]
    UnsupportedEncoding(String),

    /// Compressing or decompressing a payload failed
    #[error("compression error: {0}")]
    Compression(String),

    /// A message could not be serialized
    #[error("error serializing message: {0}")]
    Serialization(String),

    /// A message could not be deserialized
    #[error("error deserializing message: {0}")]
    Deserialization(String),

    /// Headers or call sequencing violated the protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl GrpcError {
    /// Create a protocol error
    #[must_use]
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a deserialization error
    #[must_use]
    pub fn deserialization(msg: impl Into<String>) -> Self {
        Self::Deserialization(msg.into())
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// The canonical code this error surfaces as.
    pub fn code(&self) -> Code {
        match self {
            Self::Frame(e) => e.code(),
            Self::Transport(e) => Status::from_transport_error(e).code(),
            Self::Status(s) => s.code(),
            Self::UnsupportedEncoding(_) => Code::Unimplemented,
            Self::Compression(_)
            | Self::Serialization(_)
            | Self::Deserialization(_)
            | Self::Protocol(_) => Code::Internal,
            Self::Config(_) => Code::FailedPrecondition,
        }
    }
}

impl From<GrpcError> for Status {
    fn from(err: GrpcError) -> Self {
        match err {
            GrpcError::Status(s) => s,
            GrpcError::Transport(e) => Status::from_transport_error(&e),
            other => Status::new(other.code(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_passes_through() {
        let status = Status::new(Code::Aborted, "conflict");
        let back: Status = GrpcError::from(status.clone()).into();
        assert_eq!(back, status);
    }

    #[test]
    fn test_frame_errors_map_to_canonical_codes() {
        let truncated: Status = GrpcError::from(FrameError::Truncated(3)).into();
        assert_eq!(truncated.code(), Code::Internal);

        let oversized: Status = GrpcError::from(FrameError::TooLarge {
            length: 10,
            limit: 5,
        })
        .into();
        assert_eq!(oversized.code(), Code::ResourceExhausted);
    }

    #[test]
    fn test_unsupported_encoding_is_unimplemented() {
        let status: Status = GrpcError::UnsupportedEncoding("br".into()).into();
        assert_eq!(status.code(), Code::Unimplemented);
        assert!(status.message().unwrap().contains("br"));
    }

    #[test]
    fn test_transport_reset_is_cancelled() {
        let status: Status = GrpcError::from(TransportError::StreamReset("peer".into())).into();
        assert_eq!(status.code(), Code::Cancelled);
    }
}
