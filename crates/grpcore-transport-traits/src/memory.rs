//! In-process multiplexed connections.
//!
//! [`pair`] returns a client [`Connection`] and the matching server
//! [`Acceptor`] joined by bounded channels. Stream semantics follow HTTP/2
//! closely enough to drive the engine end to end: the request header block
//! arrives as the first inbound event, end-of-stream is signalled by closing
//! the channel, dropping an un-ended outbound half resets the stream, an
//! explicit reset aborts the stream until both directions have ended, and
//! pausing an inbound half stalls the peer's data sends until it resumes.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use futures::task::AtomicWaker;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, watch};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::config::ChannelOptions;
use crate::error::{TransportError, TransportResult};
use crate::events::{CloseReason, StreamEvent};
use crate::metadata::Metadata;
use crate::traits::{
    Acceptor, BoxFuture, Connection, Connector, InboundStream, LogicalStream, OutboundStream,
};
use crate::types::{ConnectionState, Endpoint, StreamId};

/// Events buffered per stream direction before the sender waits.
const STREAM_BUFFER: usize = 16;

#[derive(Debug)]
struct Shared {
    lost: CancellationToken,
    state: Mutex<ConnectionState>,
    closed: watch::Sender<Option<CloseReason>>,
    next_id: AtomicU32,
    pauses: AtomicUsize,
}

impl Shared {
    fn set_closed(&self, reason: CloseReason) {
        self.closed.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }
}

/// State of one stream direction, shared by its two ends.
#[derive(Debug, Default)]
struct Pipe {
    reset: AtomicBool,
    reset_waker: AtomicWaker,
    ended: AtomicBool,
    paused: AtomicBool,
    resumed: Notify,
}

impl Pipe {
    async fn wait_unpaused(&self, lost: &CancellationToken) -> TransportResult<()> {
        loop {
            let resumed = self.resumed.notified();
            if !self.paused.load(Ordering::Acquire) {
                return Ok(());
            }
            tokio::select! {
                () = resumed => {}
                () = lost.cancelled() => return Err(connection_lost()),
            }
        }
    }
}

fn connection_lost() -> TransportError {
    TransportError::ConnectionLost("connection terminated".to_string())
}

/// Create a connected client/server pair.
pub fn pair() -> (Arc<MemoryConnection>, MemoryAcceptor) {
    let (closed, _) = watch::channel(None);
    let shared = Arc::new(Shared {
        lost: CancellationToken::new(),
        state: Mutex::new(ConnectionState::Open),
        closed,
        next_id: AtomicU32::new(1),
        pauses: AtomicUsize::new(0),
    });
    let (tx, rx) = mpsc::unbounded_channel();

    let connection = Arc::new(MemoryConnection {
        shared: Arc::clone(&shared),
        incoming: Mutex::new(Some(tx)),
    });
    let acceptor = MemoryAcceptor {
        incoming: rx,
        shared,
    };
    (connection, acceptor)
}

/// Create a connector whose dialed connections surface on the listener.
pub fn listener() -> (MemoryConnector, MemoryListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemoryConnector { tx }, MemoryListener { rx })
}

/// Client half of an in-process connection.
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    incoming: Mutex<Option<mpsc::UnboundedSender<LogicalStream>>>,
}

impl MemoryConnection {
    /// Number of times any inbound half on this connection was paused.
    pub fn pause_count(&self) -> usize {
        self.shared.pauses.load(Ordering::Relaxed)
    }
}

impl Connection for MemoryConnection {
    fn open_stream(&self, headers: Metadata) -> BoxFuture<'_, TransportResult<LogicalStream>> {
        Box::pin(async move {
            if !self.shared.state.lock().accepts_streams() {
                return Err(TransportError::ConnectionClosed);
            }
            let incoming = self
                .incoming
                .lock()
                .clone()
                .ok_or(TransportError::ConnectionClosed)?;

            let id = StreamId::new(self.shared.next_id.fetch_add(2, Ordering::Relaxed));
            let up = Arc::new(Pipe::default());
            let down = Arc::new(Pipe::default());
            let (up_tx, up_rx) = mpsc::channel(STREAM_BUFFER);
            let (down_tx, down_rx) = mpsc::channel(STREAM_BUFFER);

            let mut client_out =
                MemoryOutbound::new(up_tx, Arc::clone(&up), Arc::clone(&down), &self.shared);
            let server_out =
                MemoryOutbound::new(down_tx, Arc::clone(&down), Arc::clone(&up), &self.shared);
            let client_in = MemoryInbound::new(down_rx, down, &self.shared);
            let server_in = MemoryInbound::new(up_rx, up, &self.shared);

            client_out
                .push(StreamEvent::Headers(headers), false)
                .await?;

            incoming
                .send(LogicalStream {
                    id,
                    inbound: Box::new(server_in),
                    outbound: Box::new(server_out),
                })
                .map_err(|_| TransportError::ConnectionLost("acceptor dropped".to_string()))?;

            Ok(LogicalStream {
                id,
                inbound: Box::new(client_in),
                outbound: Box::new(client_out),
            })
        })
    }

    fn state(&self) -> ConnectionState {
        self.shared.state.lock().clone()
    }

    fn finish(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state == ConnectionState::Open {
                *state = ConnectionState::Draining;
            }
        }
        self.incoming.lock().take();
        self.shared.set_closed(CloseReason::Local);
    }

    fn terminate(&self) {
        *self.shared.state.lock() = ConnectionState::Closed;
        self.incoming.lock().take();
        self.shared.lost.cancel();
        self.shared.set_closed(CloseReason::Local);
    }

    fn closed(&self) -> BoxFuture<'static, CloseReason> {
        let mut rx = self.shared.closed.subscribe();
        Box::pin(async move {
            match rx.wait_for(Option::is_some).await {
                Ok(reason) => reason.clone().unwrap_or(CloseReason::Local),
                Err(_) => CloseReason::Local,
            }
        })
    }
}

/// Server half of an in-process connection.
#[derive(Debug)]
pub struct MemoryAcceptor {
    incoming: mpsc::UnboundedReceiver<LogicalStream>,
    shared: Arc<Shared>,
}

impl MemoryAcceptor {
    /// Number of times any inbound half on this connection was paused.
    pub fn pause_count(&self) -> usize {
        self.shared.pauses.load(Ordering::Relaxed)
    }

    /// Drop the connection from the server side, failing every open stream.
    pub fn terminate(&self) {
        *self.shared.state.lock() = ConnectionState::Failed {
            reason: "terminated by peer".to_string(),
        };
        self.shared.lost.cancel();
        self.shared.set_closed(CloseReason::Error(connection_lost()));
    }
}

impl Acceptor for MemoryAcceptor {
    fn accept(&mut self) -> BoxFuture<'_, Option<TransportResult<LogicalStream>>> {
        Box::pin(async move {
            tokio::select! {
                stream = self.incoming.recv() => stream.map(Ok),
                () = self.shared.lost.cancelled() => None,
            }
        })
    }
}

impl Drop for MemoryAcceptor {
    fn drop(&mut self) {
        self.shared.set_closed(CloseReason::PeerClosed);
    }
}

/// Connector handing dialed connections to a [`MemoryListener`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    tx: mpsc::UnboundedSender<MemoryAcceptor>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        _options: &ChannelOptions,
    ) -> TransportResult<Arc<dyn Connection>> {
        let (connection, acceptor) = pair();
        self.tx
            .send(acceptor)
            .map_err(|_| TransportError::ConnectionFailed(format!("no listener at {endpoint}")))?;
        let connection: Arc<dyn Connection> = connection;
        Ok(connection)
    }
}

/// Receives the server halves of connections dialed through a
/// [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryListener {
    rx: mpsc::UnboundedReceiver<MemoryAcceptor>,
}

impl MemoryListener {
    /// Wait for the next dialed connection.
    pub async fn accept(&mut self) -> Option<MemoryAcceptor> {
        self.rx.recv().await
    }
}

/// Sending half of an in-process stream.
#[derive(Debug)]
pub struct MemoryOutbound {
    tx: Option<mpsc::Sender<StreamEvent>>,
    own: Arc<Pipe>,
    reverse: Arc<Pipe>,
    shared: Arc<Shared>,
}

impl MemoryOutbound {
    fn new(
        tx: mpsc::Sender<StreamEvent>,
        own: Arc<Pipe>,
        reverse: Arc<Pipe>,
        shared: &Arc<Shared>,
    ) -> Self {
        Self {
            tx: Some(tx),
            own,
            reverse,
            shared: Arc::clone(shared),
        }
    }

    fn abort(&mut self) {
        self.tx = None;
        self.own.ended.store(true, Ordering::Release);
        if !self.own.reset.swap(true, Ordering::AcqRel) {
            self.own.reset_waker.wake();
        }
    }

    async fn push(&mut self, event: StreamEvent, end_stream: bool) -> TransportResult<()> {
        if self.shared.lost.is_cancelled() {
            return Err(connection_lost());
        }
        if self.own.reset.load(Ordering::Acquire) || self.reverse.reset.load(Ordering::Acquire) {
            return Err(TransportError::StreamReset("stream was reset".to_string()));
        }
        let Some(tx) = self.tx.as_ref() else {
            return Err(TransportError::SendFailed("stream already ended".to_string()));
        };

        let skip = matches!(&event, StreamEvent::Data(data) if data.is_empty()) && end_stream;
        if !skip {
            if matches!(event, StreamEvent::Data(_)) {
                self.own.wait_unpaused(&self.shared.lost).await?;
            }
            tokio::select! {
                sent = tx.send(event) => sent.map_err(|_| {
                    TransportError::StreamReset("peer dropped the stream".to_string())
                })?,
                () = self.shared.lost.cancelled() => return Err(connection_lost()),
            }
        }

        if end_stream {
            self.tx = None;
            self.own.ended.store(true, Ordering::Release);
        }
        Ok(())
    }
}

impl OutboundStream for MemoryOutbound {
    fn send_headers(
        &mut self,
        headers: Metadata,
        end_stream: bool,
    ) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(self.push(StreamEvent::Headers(headers), end_stream))
    }

    fn send_data(&mut self, data: Bytes, end_stream: bool) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(self.push(StreamEvent::Data(data), end_stream))
    }

    fn send_trailers(&mut self, trailers: Metadata) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(self.push(StreamEvent::Headers(trailers), true))
    }

    fn reset(&mut self) {
        if self.own.ended.load(Ordering::Acquire) && self.reverse.ended.load(Ordering::Acquire) {
            self.tx = None;
        } else {
            self.abort();
        }
    }

    fn poll_reset(&mut self, cx: &mut Context<'_>) -> Poll<TransportError> {
        let reset = &self.reverse;
        if !reset.reset.load(Ordering::Acquire) {
            reset.reset_waker.register(cx.waker());
            if !reset.reset.load(Ordering::Acquire) {
                return Poll::Pending;
            }
        }
        Poll::Ready(TransportError::StreamReset("reset by peer".to_string()))
    }
}

impl Drop for MemoryOutbound {
    fn drop(&mut self) {
        if !self.own.ended.load(Ordering::Acquire) {
            self.abort();
        }
    }
}

/// Receiving half of an in-process stream.
pub struct MemoryInbound {
    rx: mpsc::Receiver<StreamEvent>,
    pipe: Arc<Pipe>,
    shared: Arc<Shared>,
    lost: Pin<Box<WaitForCancellationFutureOwned>>,
    done: bool,
}

impl MemoryInbound {
    fn new(rx: mpsc::Receiver<StreamEvent>, pipe: Arc<Pipe>, shared: &Arc<Shared>) -> Self {
        Self {
            rx,
            pipe,
            lost: Box::pin(shared.lost.clone().cancelled_owned()),
            shared: Arc::clone(shared),
            done: false,
        }
    }

    fn fail(&mut self, error: TransportError) -> Poll<Option<TransportResult<StreamEvent>>> {
        self.done = true;
        Poll::Ready(Some(Err(error)))
    }
}

impl fmt::Debug for MemoryInbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryInbound")
            .field("pipe", &self.pipe)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Stream for MemoryInbound {
    type Item = TransportResult<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        if self.lost.as_mut().poll(cx).is_ready() {
            return self.fail(connection_lost());
        }
        if self.pipe.reset.load(Ordering::Acquire) {
            return self.fail(TransportError::StreamReset("reset by peer".to_string()));
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(None) if self.pipe.reset.load(Ordering::Acquire) => {
                self.fail(TransportError::StreamReset("reset by peer".to_string()))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl InboundStream for MemoryInbound {
    fn pause(&self) {
        if !self.pipe.paused.swap(true, Ordering::AcqRel) {
            self.shared.pauses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn resume(&self) {
        if self.pipe.paused.swap(false, Ordering::AcqRel) {
            self.pipe.resumed.notify_waiters();
        }
    }

    fn is_paused(&self) -> bool {
        self.pipe.paused.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;

    fn request_headers() -> Metadata {
        [(":method", "POST"), (":path", "/pkg.Svc/Call")]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn test_request_headers_arrive_first() {
        let (conn, mut acceptor) = pair();
        let mut client = conn.open_stream(request_headers()).await.unwrap();
        client
            .outbound
            .send_data(Bytes::from_static(b"abc"), true)
            .await
            .unwrap();

        let mut server = acceptor.accept().await.unwrap().unwrap();
        assert_eq!(server.id, client.id);

        match server.inbound.next().await {
            Some(Ok(StreamEvent::Headers(md))) => assert_eq!(md.get(":path"), Some("/pkg.Svc/Call")),
            other => panic!("expected headers, got {other:?}"),
        }
        assert_eq!(
            server.inbound.next().await,
            Some(Ok(StreamEvent::Data(Bytes::from_static(b"abc"))))
        );
        assert_eq!(server.inbound.next().await, None);
    }

    #[tokio::test]
    async fn test_empty_final_chunk_only_half_closes() {
        let (conn, mut acceptor) = pair();
        let mut client = conn.open_stream(request_headers()).await.unwrap();
        client.outbound.send_data(Bytes::new(), true).await.unwrap();

        let mut server = acceptor.accept().await.unwrap().unwrap();
        assert!(matches!(server.inbound.next().await, Some(Ok(StreamEvent::Headers(_)))));
        assert_eq!(server.inbound.next().await, None);
    }

    #[tokio::test]
    async fn test_dropped_outbound_resets_peer() {
        let (conn, mut acceptor) = pair();
        let client = conn.open_stream(request_headers()).await.unwrap();
        let mut server = acceptor.accept().await.unwrap().unwrap();
        drop(client);

        let mut saw_reset = false;
        while let Some(event) = server.inbound.next().await {
            if let Err(TransportError::StreamReset(_)) = event {
                saw_reset = true;
            }
        }
        assert!(saw_reset);

        let err = server
            .outbound
            .send_headers(Metadata::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::StreamReset(_)));
    }

    #[tokio::test]
    async fn test_reset_after_half_close_reaches_peer() {
        let (conn, mut acceptor) = pair();
        let mut client = conn.open_stream(request_headers()).await.unwrap();
        client.outbound.send_data(Bytes::new(), true).await.unwrap();
        let mut server = acceptor.accept().await.unwrap().unwrap();
        while server.inbound.next().await.is_some() {}

        let pending = futures::future::poll_fn(|cx| server.outbound.poll_reset(cx));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), pending)
                .await
                .is_err()
        );

        client.outbound.reset();
        let reset = futures::future::poll_fn(|cx| server.outbound.poll_reset(cx)).await;
        assert!(matches!(reset, TransportError::StreamReset(_)));
        assert!(matches!(
            server.outbound.send_headers(Metadata::new(), false).await,
            Err(TransportError::StreamReset(_))
        ));
    }

    #[tokio::test]
    async fn test_drop_after_half_close_keeps_stream() {
        let (conn, mut acceptor) = pair();
        let mut client = conn.open_stream(request_headers()).await.unwrap();
        client.outbound.send_data(Bytes::new(), true).await.unwrap();
        let mut server = acceptor.accept().await.unwrap().unwrap();
        drop(client.outbound);

        server
            .outbound
            .send_headers(Metadata::new(), true)
            .await
            .unwrap();
        assert!(matches!(
            client.inbound.next().await,
            Some(Ok(StreamEvent::Headers(_)))
        ));
    }

    #[tokio::test]
    async fn test_terminate_fails_open_streams() {
        let (conn, mut acceptor) = pair();
        let mut client = conn.open_stream(request_headers()).await.unwrap();
        let _server = acceptor.accept().await.unwrap().unwrap();

        conn.terminate();

        assert!(matches!(
            client.inbound.next().await,
            Some(Err(TransportError::ConnectionLost(_)))
        ));
        assert!(acceptor.accept().await.is_none());
        assert_eq!(conn.closed().await, CloseReason::Local);
        assert!(matches!(
            conn.open_stream(request_headers()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_finish_drains_then_ends_accept() {
        let (conn, mut acceptor) = pair();
        let _client = conn.open_stream(request_headers()).await.unwrap();
        conn.finish();

        assert_eq!(conn.state(), ConnectionState::Draining);
        assert!(acceptor.accept().await.is_some());
        assert!(acceptor.accept().await.is_none());
    }

    #[tokio::test]
    async fn test_pause_stalls_peer_data() {
        let (conn, mut acceptor) = pair();
        let mut client = conn.open_stream(request_headers()).await.unwrap();
        let server = acceptor.accept().await.unwrap().unwrap();

        server.inbound.pause();
        assert!(server.inbound.is_paused());
        assert_eq!(conn.pause_count(), 1);

        let send = client.outbound.send_data(Bytes::from_static(b"x"), false);
        tokio::pin!(send);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut send)
                .await
                .is_err()
        );

        server.inbound.resume();
        send.await.unwrap();
    }

    #[tokio::test]
    async fn test_connector_hands_connection_to_listener() {
        let (connector, mut listener) = listener();
        let conn = connector
            .connect(&Endpoint::new("memory", 0), &ChannelOptions::default())
            .await
            .unwrap();
        let mut acceptor = listener.accept().await.unwrap();

        let _client = conn.open_stream(request_headers()).await.unwrap();
        assert!(acceptor.accept().await.is_some());
    }
}
