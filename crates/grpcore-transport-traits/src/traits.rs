//! Core transport traits.
//!
//! A connection multiplexes independent logical streams. Each logical stream
//! is split into an inbound half (a [`Stream`] of [`StreamEvent`]s that can
//! be paused for flow control) and an outbound half used to emit headers,
//! body bytes, and trailers.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::config::ChannelOptions;
use crate::error::{TransportError, TransportResult};
use crate::events::{CloseReason, StreamEvent};
use crate::metadata::Metadata;
use crate::types::{ConnectionState, Endpoint, StreamId};

/// A boxed, sendable future, as returned by the object-safe transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The receiving half of a logical stream.
///
/// The sequence ends (`None`) at the peer's end-of-stream. An `Err` item
/// means the stream was reset or the connection was lost.
pub trait InboundStream: Stream<Item = TransportResult<StreamEvent>> + Send + Unpin {
    /// Stop granting the peer flow-control credit.
    ///
    /// Events already buffered may still be delivered; the peer stalls once
    /// its window is exhausted.
    fn pause(&self);

    /// Resume granting flow-control credit.
    fn resume(&self);

    /// Returns `true` while paused.
    fn is_paused(&self) -> bool;
}

/// The sending half of a logical stream.
pub trait OutboundStream: Send + fmt::Debug {
    /// Send a header block. With `end_stream` set, no body or trailers follow
    /// (a trailers-only response).
    fn send_headers(
        &mut self,
        headers: Metadata,
        end_stream: bool,
    ) -> BoxFuture<'_, TransportResult<()>>;

    /// Send body bytes, waiting for flow-control capacity. With `end_stream`
    /// set, the local side half-closes after this chunk.
    fn send_data(&mut self, data: Bytes, end_stream: bool) -> BoxFuture<'_, TransportResult<()>>;

    /// Send the trailing header block and end the stream.
    fn send_trailers(&mut self, trailers: Metadata) -> BoxFuture<'_, TransportResult<()>>;

    /// Abort the stream. The peer observes a reset; later sends fail.
    ///
    /// Unlike dropping, this also aborts a stream whose local side has
    /// already half-closed while the peer is still sending.
    fn reset(&mut self);

    /// Resolves with the reset error once the peer aborts the stream, even
    /// after the inbound half has ended.
    ///
    /// Transports that only report resets through the inbound half keep the
    /// default, which never resolves.
    fn poll_reset(&mut self, cx: &mut Context<'_>) -> Poll<TransportError> {
        let _ = cx;
        Poll::Pending
    }
}

/// Both halves of one logical stream.
pub struct LogicalStream {
    /// Transport-assigned stream identifier.
    pub id: StreamId,
    /// Events from the peer.
    pub inbound: Box<dyn InboundStream>,
    /// Frames to the peer.
    pub outbound: Box<dyn OutboundStream>,
}

impl fmt::Debug for LogicalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalStream")
            .field("id", &self.id)
            .field("outbound", &self.outbound)
            .finish_non_exhaustive()
    }
}

/// Client side of a multiplexed connection.
pub trait Connection: Send + Sync + fmt::Debug {
    /// Open a new logical stream, sending `headers` as its initial header
    /// block.
    fn open_stream(&self, headers: Metadata) -> BoxFuture<'_, TransportResult<LogicalStream>>;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Refuse new streams; in-flight streams run to completion.
    fn finish(&self);

    /// Close the connection immediately, failing every open stream.
    fn terminate(&self);

    /// Resolves once the connection has closed, with the reason.
    fn closed(&self) -> BoxFuture<'static, CloseReason>;
}

/// Server side of a multiplexed connection: yields peer-initiated streams.
///
/// The request header block is the first inbound event of each stream.
pub trait Acceptor: Send + fmt::Debug {
    /// Wait for the next peer-initiated stream. `None` once the connection
    /// has closed.
    fn accept(&mut self) -> BoxFuture<'_, Option<TransportResult<LogicalStream>>>;
}

/// Establishes client connections.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Dial `endpoint` with the given channel options.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ChannelOptions,
    ) -> TransportResult<Arc<dyn Connection>>;
}
