//! gRPC message framing.
//!
//! gRPC messages are length-prefixed with the following format:
//! - 1 byte: compressed flag (0 = uncompressed, 1 = compressed)
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: message payload

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::Stream;
use pin_project_lite::pin_project;
use thiserror::Error;

use grpcore_transport_traits::{Metadata, StreamEvent, TransportResult};

use crate::code::Code;
use crate::error::GrpcError;

/// Size of the gRPC message header (1 byte flag + 4 bytes length).
pub const HEADER_SIZE: usize = 5;

/// Maximum message size (4MB default, matches gRPC default).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Framing failures. All of them end the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The compressed-flag byte was neither 0 nor 1.
    #[error("invalid compressed flag {0:#04x}")]
    InvalidFlag(u8),

    /// The declared length exceeds the configured limit.
    #[error("message of {length} bytes exceeds the {limit} byte limit")]
    TooLarge {
        /// Declared payload length.
        length: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// The stream ended inside a frame.
    #[error("stream ended with {0} bytes of an incomplete frame")]
    Truncated(usize),
}

impl FrameError {
    /// The canonical code this error surfaces as.
    pub fn code(&self) -> Code {
        match self {
            Self::TooLarge { .. } => Code::ResourceExhausted,
            Self::InvalidFlag(_) | Self::Truncated(_) => Code::Internal,
        }
    }
}

/// One complete frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Payload bytes, still compressed if `compressed` is set.
    pub payload: Bytes,
    /// The compressed flag.
    pub compressed: bool,
}

/// Encode a message with explicit compression flag.
///
/// The result is exactly `HEADER_SIZE + data.len()` bytes.
pub fn encode_frame(data: &[u8], compressed: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + data.len());
    buf.put_u8(u8::from(compressed));
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
    buf.freeze()
}

/// Stateful decoder for gRPC messages.
///
/// Bytes are fed in arbitrary chunks; complete frames are drained with
/// [`decode_frame`](Self::decode_frame) and leftovers carry over to the next
/// feed.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_message_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder with the default size limit.
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a decoder rejecting frames larger than `max_message_size`.
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_message_size,
        }
    }

    /// Feed data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame.
    ///
    /// Returns `Ok(None)` if more data is needed. The length is checked
    /// against the limit as soon as the header is complete, before the
    /// payload is buffered.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let compressed = match self.buffer[0] {
            0 => false,
            1 => true,
            flag => return Err(FrameError::InvalidFlag(flag)),
        };
        let length = u32::from_be_bytes([
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
        ]) as usize;

        if length > self.max_message_size {
            return Err(FrameError::TooLarge {
                length,
                limit: self.max_message_size,
            });
        }

        if self.buffer.len() < HEADER_SIZE + length {
            self.buffer.reserve(HEADER_SIZE + length - self.buffer.len());
            return Ok(None);
        }

        self.buffer.advance(HEADER_SIZE);
        let payload = self.buffer.split_to(length).freeze();
        Ok(Some(Frame {
            payload,
            compressed,
        }))
    }

    /// Signal end of input; fails if a partial frame is still buffered.
    pub fn finish(&self) -> Result<(), FrameError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(FrameError::Truncated(self.buffer.len()))
        }
    }

    /// Get the amount of buffered data.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

/// One item of a decoded inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMessage {
    /// A header block (initial headers or trailers), passed through as is.
    Metadata(Metadata),
    /// One complete message.
    Data {
        /// Payload bytes.
        payload: Bytes,
        /// Whether the payload is still compressed.
        compressed: bool,
    },
}

pin_project! {
    /// Adapts a stream of transport events into a stream of
    /// [`DecodedMessage`]s.
    ///
    /// Header events pass through in arrival order relative to the frames
    /// around them. The stream ends after the first error.
    #[derive(Debug)]
    pub struct FramedStream<S> {
        #[pin]
        events: S,
        decoder: FrameDecoder,
        done: bool,
    }
}

/// Decode a transport event stream with the given size limit.
pub fn decode<S>(events: S, max_message_size: usize) -> FramedStream<S>
where
    S: Stream<Item = TransportResult<StreamEvent>>,
{
    FramedStream {
        events,
        decoder: FrameDecoder::with_max_message_size(max_message_size),
        done: false,
    }
}

impl<S> FramedStream<S> {
    /// Borrow the underlying event stream.
    pub fn get_ref(&self) -> &S {
        &self.events
    }

    /// Mutably borrow the underlying event stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.events
    }

    /// Consume the adapter, returning the underlying event stream.
    pub fn into_inner(self) -> S {
        self.events
    }
}

impl<S> Stream for FramedStream<S>
where
    S: Stream<Item = TransportResult<StreamEvent>>,
{
    type Item = Result<DecodedMessage, GrpcError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        loop {
            match this.decoder.decode_frame() {
                Ok(Some(frame)) => {
                    return Poll::Ready(Some(Ok(DecodedMessage::Data {
                        payload: frame.payload,
                        compressed: frame.compressed,
                    })));
                }
                Ok(None) => {}
                Err(e) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e.into())));
                }
            }

            match this.events.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(StreamEvent::Data(chunk)))) => this.decoder.feed(&chunk),
                Poll::Ready(Some(Ok(StreamEvent::Headers(metadata)))) => {
                    return Poll::Ready(Some(Ok(DecodedMessage::Metadata(metadata))));
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e.into())));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    return Poll::Ready(this.decoder.finish().err().map(|e| Err(e.into())));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
