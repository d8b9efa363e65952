//! The client channel and typed call helpers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use grpcore_core::transport::{
    ChannelOptions, CloseReason, Connection, ConnectionState, Connector, Endpoint, TransportError,
};
use grpcore_core::{
    CompressionRegistry, Deserializer, GrpcError, GrpcResult, MessageDecoder, MessageEncoder,
    Metadata, Serializer, Status,
};

use crate::call::{CallReceiver, CallSender, CallStream};
use crate::headers::HeaderTemplate;

/// Per-call settings.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    metadata: Metadata,
    timeout: Option<Duration>,
}

impl CallOptions {
    /// No metadata, no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise a deadline through `grpc-timeout`.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.append(key, value);
        self
    }

    /// Add a binary metadata entry; `key` must end in `-bin`.
    #[must_use]
    pub fn metadata_bin(mut self, key: impl Into<String>, value: &[u8]) -> Self {
        self.metadata.append_bin(key, value);
        self
    }
}

/// Client-side view of a method: its path and message codecs.
pub struct ClientMethod<Req, Resp> {
    path: String,
    serialize: Serializer<Req>,
    deserialize: Deserializer<Resp>,
}

impl<Req, Resp> ClientMethod<Req, Resp> {
    /// A method at `path` (`/{service}/{method}`).
    pub fn new(
        path: impl Into<String>,
        serialize: Serializer<Req>,
        deserialize: Deserializer<Resp>,
    ) -> Self {
        Self {
            path: path.into(),
            serialize,
            deserialize,
        }
    }

    /// The request path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl<Req, Resp> Clone for ClientMethod<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            serialize: Arc::clone(&self.serialize),
            deserialize: Arc::clone(&self.deserialize),
        }
    }
}

impl<Req, Resp> fmt::Debug for ClientMethod<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientMethod")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Typed response sequence of a call.
pub struct Responses<Resp> {
    receiver: CallReceiver,
    deserialize: Deserializer<Resp>,
}

impl<Resp> Responses<Resp> {
    /// Next response; `Ok(None)` after an `OK` status.
    pub async fn message(&mut self) -> Result<Option<Resp>, Status> {
        self.receiver.message_as(&self.deserialize).await
    }

    /// Response headers, once received.
    pub fn headers(&self) -> Option<&Metadata> {
        self.receiver.headers()
    }

    /// Trailers, once received.
    pub fn trailers(&self) -> Option<&Metadata> {
        self.receiver.trailers()
    }

    /// Final status, once the call has ended.
    pub fn status(&self) -> Option<&Status> {
        self.receiver.status()
    }
}

impl<Resp: Send + 'static> Responses<Resp> {
    /// Adapt into a stream that ends after the first error.
    pub fn into_stream(self) -> BoxStream<'static, Result<Resp, Status>> {
        stream::unfold(Some(self), |state| async move {
            let mut responses = state?;
            match responses.message().await {
                Ok(Some(message)) => Some((Ok(message), Some(responses))),
                Ok(None) => None,
                Err(status) => Some((Err(status), None)),
            }
        })
        .boxed()
    }
}

impl<Resp> fmt::Debug for Responses<Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responses")
            .field("receiver", &self.receiver)
            .finish_non_exhaustive()
    }
}

/// Typed request sink of a bidirectional call.
pub struct Requests<Req> {
    sender: CallSender,
    serialize: Serializer<Req>,
}

impl<Req> Requests<Req> {
    /// Send one request.
    pub async fn send(&mut self, request: &Req) -> Result<(), Status> {
        self.sender
            .send_message(&self.serialize, request)
            .await
            .map_err(Status::from)
    }

    /// Half-close the request side.
    pub async fn close(&mut self) -> Result<(), Status> {
        self.sender.close().await.map_err(Status::from)
    }

    /// Abort the call.
    pub fn reset(&mut self) {
        self.sender.reset();
    }
}

impl<Req> fmt::Debug for Requests<Req> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requests")
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

/// A channel to one server over one multiplexed connection.
///
/// Clones share the connection.
#[derive(Clone)]
pub struct Client {
    connection: Arc<dyn Connection>,
    template: Arc<HeaderTemplate>,
    compression: CompressionRegistry,
    send_encoding: Option<String>,
    compress_min_size: usize,
    max_message_size: usize,
    closed: watch::Receiver<Option<CloseReason>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.connection)
            .field("authority", &self.template.authority())
            .field("send_encoding", &self.send_encoding)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Dial `endpoint` through `connector`.
    ///
    /// # Errors
    ///
    /// Returns [`GrpcError::Transport`] if the connection cannot be
    /// established within the configured connect timeout.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn connect(
        connector: &dyn Connector,
        endpoint: &Endpoint,
        options: ChannelOptions,
    ) -> GrpcResult<Self> {
        let connection = tokio::time::timeout(
            options.connect_timeout,
            connector.connect(endpoint, &options),
        )
        .await
        .map_err(|_| {
            GrpcError::Transport(TransportError::ConnectionTimeout {
                endpoint: endpoint.to_string(),
                timeout: options.connect_timeout,
            })
        })??;
        info!("connected");
        Ok(Self::new(connection, endpoint.authority(), options))
    }

    /// Wrap an established connection. `authority` is used unless the
    /// options override it.
    ///
    /// Must be called within a Tokio runtime: a task watches the connection
    /// for closure.
    pub fn new(
        connection: Arc<dyn Connection>,
        authority: impl Into<String>,
        options: ChannelOptions,
    ) -> Self {
        Self::with_compression(connection, authority, options, CompressionRegistry::default())
    }

    /// Like [`new`](Self::new), with an explicit codec set.
    pub fn with_compression(
        connection: Arc<dyn Connection>,
        authority: impl Into<String>,
        options: ChannelOptions,
        compression: CompressionRegistry,
    ) -> Self {
        let authority = options.authority.clone().unwrap_or_else(|| authority.into());

        let send_encoding = match options.send_encoding.as_deref() {
            Some(name) if compression.get(name).is_some() => Some(name.to_ascii_lowercase()),
            Some(name) => {
                warn!(encoding = name, "unknown send encoding, sending uncompressed");
                None
            }
            None => None,
        };

        let template = HeaderTemplate::new(options.credentials.is_secure(), authority)
            .user_agent(options.user_agent.clone())
            .accept_encoding(compression.accept_encoding())
            .send_encoding(send_encoding.clone());

        let (closed_tx, closed) = watch::channel(None);
        let on_closed = connection.closed();
        tokio::spawn(async move {
            let reason = on_closed.await;
            if reason.is_unexpected() {
                warn!(reason = ?reason, "connection closed unexpectedly");
            } else {
                debug!("connection closed");
            }
            let _ = closed_tx.send(Some(reason));
        });

        Self {
            connection,
            template: Arc::new(template),
            compression,
            send_encoding,
            compress_min_size: options.compress_min_size,
            max_message_size: options.max_message_size,
            closed,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Why the connection closed, if it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed.borrow().clone()
    }

    /// Wait for the connection to close.
    pub async fn closed(&self) -> CloseReason {
        let mut closed = self.closed.clone();
        match closed.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or(CloseReason::Local),
            Err(_) => CloseReason::Local,
        }
    }

    /// Run `callback` once if the connection closes without a local
    /// `finish()` or `terminate()`.
    pub fn on_unexpected_close<F>(&self, callback: F)
    where
        F: FnOnce(CloseReason) + Send + 'static,
    {
        let client = self.clone();
        tokio::spawn(async move {
            let reason = client.closed().await;
            if reason.is_unexpected() {
                callback(reason);
            }
        });
    }

    /// Graceful close: no new calls; calls in flight complete.
    pub fn finish(&self) {
        info!("finishing connection");
        self.connection.finish();
    }

    /// Abort the connection and every call on it.
    pub fn terminate(&self) {
        info!("terminating connection");
        self.connection.terminate();
    }

    /// Start a call: open a logical stream with the request headers and wrap
    /// both directions with framing and compression.
    pub async fn make_request(&self, path: &str, options: CallOptions) -> GrpcResult<CallStream> {
        let headers = self.template.build(path, options.timeout, &options.metadata);
        let stream = self.connection.open_stream(headers).await?;
        debug!(stream = %stream.id, path, "call started");

        let codec = self
            .send_encoding
            .as_deref()
            .and_then(|name| self.compression.get(name));
        let encoder = MessageEncoder::new(codec, self.compress_min_size);
        let decoder = MessageDecoder::new(self.compression.clone(), self.max_message_size);
        Ok(CallStream::new(stream, encoder, decoder, self.max_message_size))
    }

    async fn start<Req, Resp>(
        &self,
        method: &ClientMethod<Req, Resp>,
        options: CallOptions,
    ) -> Result<(Requests<Req>, Responses<Resp>), Status> {
        let (sender, receiver) = self
            .make_request(&method.path, options)
            .await
            .map_err(Status::from)?
            .into_parts();
        Ok((
            Requests {
                sender,
                serialize: Arc::clone(&method.serialize),
            },
            Responses {
                receiver,
                deserialize: Arc::clone(&method.deserialize),
            },
        ))
    }

    /// One request, one response.
    pub async fn unary<Req, Resp>(
        &self,
        method: &ClientMethod<Req, Resp>,
        request: &Req,
        options: CallOptions,
    ) -> Result<Resp, Status> {
        let (mut requests, responses) = self.start(method, options).await?;
        let payload = (requests.serialize)(request)?;
        let sent = requests
            .sender
            .send_last(&payload)
            .await
            .map_err(Status::from);
        single_response(responses, sent).await
    }

    /// One request, a sequence of responses.
    pub async fn server_streaming<Req, Resp>(
        &self,
        method: &ClientMethod<Req, Resp>,
        request: &Req,
        options: CallOptions,
    ) -> Result<Responses<Resp>, Status> {
        let (mut requests, mut responses) = self.start(method, options).await?;
        let payload = (requests.serialize)(request)?;
        if let Err(e) = requests.sender.send_last(&payload).await {
            // the server may already have answered with a status
            responses.message().await?;
            return Err(Status::from(e));
        }
        Ok(responses)
    }

    /// A sequence of requests, one response.
    pub async fn client_streaming<Req, Resp, S>(
        &self,
        method: &ClientMethod<Req, Resp>,
        requests: S,
        options: CallOptions,
    ) -> Result<Resp, Status>
    where
        S: Stream<Item = Req> + Send,
    {
        let (mut sink, responses) = self.start(method, options).await?;
        let mut requests = std::pin::pin!(requests);
        let mut sent = Ok(());
        while let Some(request) = requests.next().await {
            sent = sink.send(&request).await;
            if sent.is_err() {
                break;
            }
        }
        if sent.is_ok() {
            sent = sink.close().await;
        }
        single_response(responses, sent).await
    }

    /// Request and response sequences, independently driven.
    pub async fn bidi_streaming<Req, Resp>(
        &self,
        method: &ClientMethod<Req, Resp>,
        options: CallOptions,
    ) -> Result<(Requests<Req>, Responses<Resp>), Status> {
        self.start(method, options).await
    }
}

/// Read exactly one response and the status behind it.
///
/// A send failure usually means the server already ended the call; its
/// status wins over the transport error when one is available.
async fn single_response<Resp>(
    mut responses: Responses<Resp>,
    sent: Result<(), Status>,
) -> Result<Resp, Status> {
    let first = responses.message().await;
    if let Err(e) = sent {
        first?;
        return Err(e);
    }
    let response = first?.ok_or_else(|| Status::internal("missing response message"))?;
    match responses.message().await? {
        None => Ok(response),
        Some(_) => Err(Status::internal("too many response messages")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grpcore_core::codec::{string_deserializer, string_serializer};
    use grpcore_core::transport::{Acceptor, StreamEvent, memory};
    use grpcore_core::{Code, encode_frame};

    #[test]
    fn test_call_options() {
        let options = CallOptions::new()
            .timeout(Duration::from_secs(2))
            .metadata("x-a", "1")
            .metadata_bin("x-b-bin", &[0, 1, 2]);
        assert_eq!(options.timeout, Some(Duration::from_secs(2)));
        assert_eq!(options.metadata.get("x-a"), Some("1"));
        assert_eq!(options.metadata.get_bin("x-b-bin"), Some(vec![0, 1, 2]));
    }

    #[tokio::test]
    async fn test_make_request_sends_headers() {
        let (connection, mut acceptor) = memory::pair();
        let client = Client::new(connection, "localhost:50051", ChannelOptions::default());

        let mut call = client
            .make_request(
                "/helloworld.Greeter/SayHello",
                CallOptions::new().metadata("x-trace", "abc"),
            )
            .await
            .unwrap();
        call.sender().send_last(b"world").await.unwrap();

        let mut stream = acceptor.accept().await.unwrap().unwrap();
        let Some(Ok(StreamEvent::Headers(headers))) = stream.inbound.next().await else {
            panic!("expected request headers");
        };
        assert_eq!(headers.get(":path"), Some("/helloworld.Greeter/SayHello"));
        assert_eq!(headers.get(":authority"), Some("localhost:50051"));
        assert_eq!(headers.get(":scheme"), Some("http"));
        assert_eq!(headers.get("x-trace"), Some("abc"));

        assert_eq!(
            stream.inbound.next().await.unwrap().unwrap(),
            StreamEvent::Data(encode_frame(b"world", false))
        );
        assert!(stream.inbound.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unary_against_scripted_server() {
        let (connection, mut acceptor) = memory::pair();
        let client = Client::new(connection, "localhost", ChannelOptions::default());
        let method = ClientMethod::new(
            "/helloworld.Greeter/SayHello",
            string_serializer(),
            string_deserializer(),
        );

        let server = tokio::spawn(async move {
            let mut stream = acceptor.accept().await.unwrap().unwrap();
            while stream.inbound.next().await.is_some() {}

            let mut headers = Metadata::new();
            headers.append(":status", "200");
            stream.outbound.send_headers(headers, false).await.unwrap();
            stream
                .outbound
                .send_data(encode_frame(b"Hello world", false), false)
                .await
                .unwrap();
            stream
                .outbound
                .send_trailers(Status::ok().to_trailers())
                .await
                .unwrap();
        });

        let reply = client
            .unary(&method, &"world".to_string(), CallOptions::new())
            .await
            .unwrap();
        assert_eq!(reply, "Hello world");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unary_without_response_is_internal() {
        let (connection, mut acceptor) = memory::pair();
        let client = Client::new(connection, "localhost", ChannelOptions::default());
        let method = ClientMethod::new("/s/m", string_serializer(), string_deserializer());

        tokio::spawn(async move {
            let mut stream = acceptor.accept().await.unwrap().unwrap();
            while stream.inbound.next().await.is_some() {}
            let mut block = Metadata::new();
            block.append(":status", "200");
            Status::ok().append_to(&mut block);
            stream.outbound.send_headers(block, true).await.unwrap();
        });

        let err = client
            .unary(&method, &"x".to_string(), CallOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_unexpected_close_notification() {
        let (connection, acceptor) = memory::pair();
        let client = Client::new(connection, "localhost", ChannelOptions::default());

        let (tx, rx) = tokio::sync::oneshot::channel();
        client.on_unexpected_close(move |reason| {
            let _ = tx.send(reason);
        });

        acceptor.terminate();
        let reason = rx.await.unwrap();
        assert!(reason.is_unexpected());
        assert!(client.close_reason().unwrap().is_unexpected());
    }

    #[tokio::test]
    async fn test_finish_is_not_unexpected() {
        let (connection, _acceptor) = memory::pair();
        let client = Client::new(connection, "localhost", ChannelOptions::default());

        client.finish();
        assert_eq!(client.closed().await, CloseReason::Local);
        assert!(client.make_request("/s/m", CallOptions::new()).await.is_err());
    }
}
