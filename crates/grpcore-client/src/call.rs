//! One client call over a logical stream.
//!
//! [`CallStream`] pairs a [`CallSender`], which serializes, compresses and
//! frames outgoing messages, with a [`CallReceiver`], which unframes and
//! decompresses the response and tracks the header blocks that carry the
//! final status.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::{Stream, StreamExt};

use grpcore_core::headers::{GRPC_ENCODING, GRPC_STATUS, STATUS};
use grpcore_core::transport::{InboundStream, LogicalStream, OutboundStream, StreamId};
use grpcore_core::{
    Code, DecodedMessage, Deserializer, FramedStream, GrpcResult, MessageDecoder, MessageEncoder,
    Metadata, Serializer, Status, decode,
};

/// A started call.
#[derive(Debug)]
pub struct CallStream {
    id: StreamId,
    sender: CallSender,
    receiver: CallReceiver,
}

impl CallStream {
    pub(crate) fn new(
        stream: LogicalStream,
        encoder: MessageEncoder,
        decoder: MessageDecoder,
        max_message_size: usize,
    ) -> Self {
        let LogicalStream {
            id,
            inbound,
            outbound,
        } = stream;
        Self {
            id,
            sender: CallSender {
                outbound,
                encoder,
                closed: false,
            },
            receiver: CallReceiver {
                inbound: decode(inbound, max_message_size),
                decoder,
                headers: None,
                trailers: None,
                status: None,
            },
        }
    }

    /// Transport stream id.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// The sending half.
    pub fn sender(&mut self) -> &mut CallSender {
        &mut self.sender
    }

    /// The receiving half.
    pub fn receiver(&mut self) -> &mut CallReceiver {
        &mut self.receiver
    }

    /// Split into independently owned halves.
    pub fn into_parts(self) -> (CallSender, CallReceiver) {
        (self.sender, self.receiver)
    }
}

/// Outbound message sink of a call.
///
/// Dropping a sender that has not been closed resets the stream on
/// transports that abort on drop.
#[derive(Debug)]
pub struct CallSender {
    outbound: Box<dyn OutboundStream>,
    encoder: MessageEncoder,
    closed: bool,
}

impl CallSender {
    /// Frame and send one serialized message.
    pub async fn send(&mut self, payload: &[u8]) -> GrpcResult<()> {
        let frame = self.encoder.encode(payload)?;
        self.outbound.send_data(frame, false).await?;
        Ok(())
    }

    /// Send one message and half-close in the same step.
    pub async fn send_last(&mut self, payload: &[u8]) -> GrpcResult<()> {
        let frame = self.encoder.encode(payload)?;
        self.outbound.send_data(frame, true).await?;
        self.closed = true;
        Ok(())
    }

    /// Serialize and send a typed message.
    pub async fn send_message<T>(&mut self, serialize: &Serializer<T>, message: &T) -> GrpcResult<()> {
        let payload = serialize(message)?;
        self.send(&payload).await
    }

    /// Half-close: no more requests follow. Idempotent.
    pub async fn close(&mut self) -> GrpcResult<()> {
        if !self.closed {
            self.outbound.send_data(Bytes::new(), true).await?;
            self.closed = true;
        }
        Ok(())
    }

    /// Abort the call.
    pub fn reset(&mut self) {
        self.closed = true;
        self.outbound.reset();
    }

    /// Returns `true` once half-closed or reset.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Inbound side of a call.
///
/// As a [`Stream`] it yields every [`DecodedMessage`] with payloads already
/// decompressed. [`message`](Self::message) is the higher-level view:
/// payloads only, ending with the call's status.
pub struct CallReceiver {
    inbound: FramedStream<Box<dyn InboundStream>>,
    decoder: MessageDecoder,
    headers: Option<Metadata>,
    trailers: Option<Metadata>,
    status: Option<Status>,
}

impl std::fmt::Debug for CallReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallReceiver")
            .field("headers", &self.headers)
            .field("trailers", &self.trailers)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl CallReceiver {
    /// Response headers, once received.
    pub fn headers(&self) -> Option<&Metadata> {
        self.headers.as_ref()
    }

    /// Trailers, once received. A trailers-only response stores its single
    /// block in both places.
    pub fn trailers(&self) -> Option<&Metadata> {
        self.trailers.as_ref()
    }

    /// Final status, once the call has ended.
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    fn observe(&mut self, block: &Metadata) {
        if self.headers.is_none() {
            self.decoder.set_encoding(block.get(GRPC_ENCODING));
            self.headers = Some(block.clone());
            if block.contains_key(GRPC_STATUS) {
                self.trailers = Some(block.clone());
            }
        } else {
            self.trailers = Some(block.clone());
        }
    }

    /// Next response payload; `Ok(None)` once the call ended with `OK`,
    /// `Err` with the final status otherwise.
    pub async fn message(&mut self) -> Result<Option<Bytes>, Status> {
        if let Some(status) = &self.status {
            return if status.is_ok() {
                Ok(None)
            } else {
                Err(status.clone())
            };
        }

        while let Some(item) = self.next().await {
            match item {
                Ok(DecodedMessage::Data { payload, .. }) => return Ok(Some(payload)),
                Ok(DecodedMessage::Metadata(_)) => {}
                Err(e) => return Err(self.conclude(Status::from(e))),
            }
        }

        let status = self.final_status();
        let status = self.conclude(status);
        if status.is_ok() { Ok(None) } else { Err(status) }
    }

    /// Next response, deserialized.
    pub async fn message_as<T>(&mut self, deserialize: &Deserializer<T>) -> Result<Option<T>, Status> {
        match self.message().await? {
            Some(payload) => deserialize(&payload[..]).map(Some),
            None => Ok(None),
        }
    }

    fn final_status(&self) -> Status {
        if let Some(status) = self.trailers.as_ref().and_then(Status::from_trailers) {
            return status;
        }
        match self
            .headers
            .as_ref()
            .and_then(|h| h.get(STATUS))
            .and_then(|s| s.parse::<u16>().ok())
        {
            Some(http) if http != 200 => Status::new(
                http_status_to_code(http),
                format!("unexpected HTTP status {http}"),
            ),
            _ => Status::internal("missing grpc-status"),
        }
    }

    fn conclude(&mut self, status: Status) -> Status {
        self.status = Some(status.clone());
        status
    }
}

impl Stream for CallReceiver {
    type Item = GrpcResult<DecodedMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let item = ready!(this.inbound.poll_next_unpin(cx));
        Poll::Ready(match item {
            Some(Ok(DecodedMessage::Metadata(block))) => {
                this.observe(&block);
                Some(Ok(DecodedMessage::Metadata(block)))
            }
            Some(Ok(data)) => Some(this.decoder.process(data)),
            other => other,
        })
    }
}

/// The gRPC mapping for HTTP statuses of responses without `grpc-status`.
pub(crate) fn http_status_to_code(status: u16) -> Code {
    match status {
        400 => Code::Internal,
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        404 => Code::Unimplemented,
        429 | 502 | 503 | 504 => Code::Unavailable,
        _ => Code::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grpcore_core::transport::{StreamEvent, TransportResult};
    use grpcore_core::{CompressionRegistry, encode_frame};

    struct Replay(std::vec::IntoIter<TransportResult<StreamEvent>>);

    impl Stream for Replay {
        type Item = TransportResult<StreamEvent>;

        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Ready(self.0.next())
        }
    }

    impl InboundStream for Replay {
        fn pause(&self) {}
        fn resume(&self) {}
        fn is_paused(&self) -> bool {
            false
        }
    }

    fn receiver(events: Vec<StreamEvent>) -> CallReceiver {
        let inbound: Box<dyn InboundStream> =
            Box::new(Replay(events.into_iter().map(Ok).collect::<Vec<_>>().into_iter()));
        CallReceiver {
            inbound: decode(inbound, 1024),
            decoder: MessageDecoder::new(CompressionRegistry::default(), 1024),
            headers: None,
            trailers: None,
            status: None,
        }
    }

    fn block(pairs: &[(&str, &str)]) -> StreamEvent {
        StreamEvent::Headers(pairs.iter().copied().collect())
    }

    #[tokio::test]
    async fn test_messages_then_ok() {
        let mut rx = receiver(vec![
            block(&[(":status", "200"), ("content-type", "application/grpc")]),
            StreamEvent::Data(encode_frame(b"one", false)),
            StreamEvent::Data(encode_frame(b"two", false)),
            block(&[("grpc-status", "0")]),
        ]);

        assert_eq!(rx.message().await.unwrap().unwrap(), "one");
        assert_eq!(rx.message().await.unwrap().unwrap(), "two");
        assert_eq!(rx.message().await.unwrap(), None);
        assert!(rx.status().unwrap().is_ok());
        assert_eq!(rx.message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_trailers_only_error() {
        let mut rx = receiver(vec![block(&[
            (":status", "200"),
            ("grpc-status", "5"),
            ("grpc-message", "not%20found"),
        ])]);

        let status = rx.message().await.unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), Some("not found"));
        assert!(rx.headers().is_some());
        assert!(rx.trailers().is_some());
    }

    #[tokio::test]
    async fn test_missing_status_is_internal() {
        let mut rx = receiver(vec![
            block(&[(":status", "200")]),
            StreamEvent::Data(encode_frame(b"one", false)),
        ]);

        assert!(rx.message().await.unwrap().is_some());
        let status = rx.message().await.unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), Some("missing grpc-status"));
    }

    #[tokio::test]
    async fn test_http_error_without_grpc_status() {
        let mut rx = receiver(vec![block(&[(":status", "503")])]);
        assert_eq!(rx.message().await.unwrap_err().code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn test_compressed_response_needs_encoding() {
        let mut rx = receiver(vec![
            block(&[(":status", "200")]),
            StreamEvent::Data(encode_frame(b"zz", true)),
        ]);
        assert_eq!(rx.message().await.unwrap_err().code(), Code::Unimplemented);
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(http_status_to_code(401), Code::Unauthenticated);
        assert_eq!(http_status_to_code(404), Code::Unimplemented);
        assert_eq!(http_status_to_code(418), Code::Unknown);
    }
}
