//! Events delivered by a logical stream and by the connection carrying it.

use bytes::Bytes;

use crate::error::TransportError;
use crate::metadata::Metadata;

/// One inbound event on a logical stream.
///
/// Data chunks carry no alignment guarantee with respect to gRPC message
/// boundaries. The end of the inbound sequence is the peer's end-of-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A header block: the initial headers, or the trailers.
    Headers(Metadata),
    /// A chunk of body bytes.
    Data(Bytes),
}

impl StreamEvent {
    /// Returns the number of body bytes carried by this event.
    pub fn data_len(&self) -> usize {
        match self {
            Self::Headers(_) => 0,
            Self::Data(data) => data.len(),
        }
    }
}

/// Why a connection stopped serving logical streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The local side called `finish()` or `terminate()`.
    Local,
    /// The peer closed the connection gracefully (GOAWAY / EOF).
    PeerClosed,
    /// The connection failed.
    Error(TransportError),
}

impl CloseReason {
    /// Returns `true` if the closure was not initiated locally.
    pub const fn is_unexpected(&self) -> bool {
        !matches!(self, Self::Local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_data_len() {
        assert_eq!(StreamEvent::Data(Bytes::from_static(b"abc")).data_len(), 3);
        assert_eq!(StreamEvent::Headers(Metadata::new()).data_len(), 0);
    }

    #[test]
    fn test_close_reason_unexpected() {
        assert!(!CloseReason::Local.is_unexpected());
        assert!(CloseReason::PeerClosed.is_unexpected());
        assert!(CloseReason::Error(TransportError::ConnectionLost("eof".into())).is_unexpected());
    }
}
