//! The per-call state machine.
//!
//! A call starts Idle: the first inbound item must be the request header
//! block, whose `:path` selects a method. The call then becomes Active,
//! shuttling decoded requests into a bounded channel read by the handler
//! while writing the handler's responses back out. It ends (Done) after
//! exactly one status has been sent, either as trailers or folded into a
//! trailers-only header block.

use std::any::Any;
use std::fmt;
use std::future::poll_fn;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use grpcore_core::headers::{
    APPLICATION_GRPC, CONTENT_TYPE, GRPC_ACCEPT_ENCODING, GRPC_ENCODING, GRPC_TIMEOUT, PATH,
    STATUS,
};
use grpcore_core::transport::{
    InboundStream, LogicalStream, OutboundStream, StreamId, TransportError,
};
use grpcore_core::{
    CompressionRegistry, DecodedMessage, Deserializer, FramedStream, GrpcError, GrpcResult,
    MessageDecoder, MessageEncoder, Metadata, Serializer, Status, decode, parse_timeout,
};

use crate::config::ServerConfig;
use crate::context::RequestContext;
use crate::method::{Handler, MethodDescriptor, ResponseStream};
use crate::metrics::ServerMetrics;
use crate::registry::ServiceRegistry;
use crate::streaming::Streaming;

type Requests = FramedStream<Box<dyn InboundStream>>;

/// Writes the response side of one call.
///
/// Headers go out once, before the first message or folded into the status
/// block when no message was ever written.
#[derive(Debug)]
struct ResponseWriter {
    outbound: Box<dyn OutboundStream>,
    encoder: MessageEncoder,
    accept_encoding: String,
    headers_sent: bool,
}

impl ResponseWriter {
    fn new(outbound: Box<dyn OutboundStream>, accept_encoding: String) -> Self {
        Self {
            outbound,
            encoder: MessageEncoder::identity(),
            accept_encoding,
            headers_sent: false,
        }
    }

    fn response_headers(&self) -> Metadata {
        let mut headers = Metadata::with_capacity(5);
        headers.append(STATUS, "200");
        headers.append(CONTENT_TYPE, APPLICATION_GRPC);
        if let Some(encoding) = self.encoder.encoding() {
            headers.append(GRPC_ENCODING, encoding);
        }
        headers.append(GRPC_ACCEPT_ENCODING, self.accept_encoding.as_str());
        headers
    }

    async fn send_message(&mut self, payload: &[u8]) -> GrpcResult<()> {
        let frame = self.encoder.encode(payload)?;
        if !self.headers_sent {
            let headers = self.response_headers();
            self.outbound.send_headers(headers, false).await?;
            self.headers_sent = true;
        }
        self.outbound.send_data(frame, false).await?;
        Ok(())
    }

    fn poll_reset(&mut self, cx: &mut Context<'_>) -> Poll<TransportError> {
        self.outbound.poll_reset(cx)
    }

    async fn finish(&mut self, status: &Status) -> GrpcResult<()> {
        if self.headers_sent {
            self.outbound.send_trailers(status.to_trailers()).await?;
        } else {
            let mut headers = Metadata::with_capacity(4);
            headers.append(STATUS, "200");
            headers.append(CONTENT_TYPE, APPLICATION_GRPC);
            status.append_to(&mut headers);
            self.headers_sent = true;
            self.outbound.send_headers(headers, true).await?;
        }
        Ok(())
    }
}

/// A routed call, handed to [`RpcMethod::serve`](crate::RpcMethod::serve).
pub struct ServerCall {
    requests: Requests,
    decoder: MessageDecoder,
    writer: ResponseWriter,
    context: RequestContext,
    request_buffer: usize,
    max_send_message_size: usize,
    metrics: Arc<ServerMetrics>,
}

impl ServerCall {
    /// The context the handler will receive.
    pub fn context(&self) -> &RequestContext {
        &self.context
    }
}

impl fmt::Debug for ServerCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCall")
            .field("context", &self.context)
            .field("decoder", &self.decoder)
            .field("writer", &self.writer)
            .field("request_buffer", &self.request_buffer)
            .finish_non_exhaustive()
    }
}

/// Routes fresh logical streams to registered methods.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    config: Arc<ServerConfig>,
    compression: CompressionRegistry,
    metrics: Arc<ServerMetrics>,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<ServiceRegistry>,
        config: Arc<ServerConfig>,
        compression: CompressionRegistry,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            registry,
            config,
            compression,
            metrics,
        }
    }

    /// Serve one logical stream from Idle to Done.
    pub(crate) async fn dispatch(&self, stream: LogicalStream) {
        let LogicalStream {
            id,
            inbound,
            outbound,
        } = stream;
        let mut requests = decode(inbound, self.config.max_receive_message_size);
        let mut writer = ResponseWriter::new(outbound, self.compression.accept_encoding());

        let headers = match requests.next().await {
            Some(Ok(DecodedMessage::Metadata(headers))) => headers,
            Some(Ok(DecodedMessage::Data { .. })) | None => {
                return self
                    .reject(id, &mut writer, Status::internal("expected header frame"))
                    .await;
            }
            Some(Err(e)) => return self.reject(id, &mut writer, Status::from(e)).await,
        };

        let path = headers.get(PATH).unwrap_or_default().to_string();
        let Some((service, method_name)) = split_path(&path) else {
            let status = Status::not_found(format!("invalid path: {path}"));
            return self.reject(id, &mut writer, status).await;
        };
        let Some(method) = self.registry.lookup(service, method_name) else {
            let status = Status::not_found(format!("not found: {path}"));
            return self.reject(id, &mut writer, status).await;
        };

        let deadline = headers
            .get(GRPC_TIMEOUT)
            .and_then(|value| match parse_timeout(value) {
                Ok(timeout) => Some(timeout),
                Err(e) => {
                    debug!(stream = %id, error = %e, "ignoring malformed grpc-timeout");
                    None
                }
            });
        let encoding = headers.get(GRPC_ENCODING).map(str::to_string);

        let mut decoder =
            MessageDecoder::new(self.compression.clone(), self.config.max_receive_message_size);
        decoder.set_encoding(encoding.as_deref());
        writer.encoder = MessageEncoder::new(
            self.compression.negotiate(
                self.config.response_encoding.as_deref(),
                headers.get(GRPC_ACCEPT_ENCODING),
            ),
            self.config.compression_min_size,
        );

        let metadata = headers.regular().collect();
        let context = RequestContext::new(
            id,
            &path,
            service,
            method_name,
            metadata,
            deadline,
            encoding,
        );

        debug!(
            stream = %id,
            path = %path,
            request_streaming = method.request_streaming(),
            response_streaming = method.response_streaming(),
            "call active"
        );
        let call = ServerCall {
            requests,
            decoder,
            writer,
            context,
            request_buffer: self.config.request_buffer.max(1),
            max_send_message_size: self.config.max_send_message_size,
            metrics: Arc::clone(&self.metrics),
        };
        method.serve(call).await;
    }

    async fn reject(&self, id: StreamId, writer: &mut ResponseWriter, status: Status) {
        self.metrics.call_rejected();
        warn!(stream = %id, code = %status.code(), message = ?status.message(), "call rejected");
        if let Err(e) = writer.finish(&status).await {
            debug!(stream = %id, error = %e, "could not deliver status");
        }
    }
}

/// Split `/{service}/{method}`. Both segments must be non-empty.
fn split_path(path: &str) -> Option<(&str, &str)> {
    let (service, method) = path.strip_prefix('/')?.split_once('/')?;
    if service.is_empty() || method.is_empty() {
        return None;
    }
    Some((service, method))
}

/// Drive an Active call until its status has been sent.
pub(crate) async fn run_active<Req, Resp>(
    method: Arc<MethodDescriptor<Req, Resp>>,
    call: ServerCall,
) where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    let ServerCall {
        mut requests,
        decoder,
        mut writer,
        context,
        request_buffer,
        max_send_message_size,
        metrics,
    } = call;
    let id = context.stream_id();
    let path = context.path().to_string();
    let single_request = !method.handler().request_streaming();

    metrics.call_started();

    let (tx, rx) = mpsc::channel(request_buffer);
    let mut responses = AssertUnwindSafe(invoke(
        method.handler().clone(),
        Streaming::new(rx),
        context,
    ))
    .catch_unwind();

    let mut tx = Some(tx);
    let mut reader = RequestReader {
        deserialize: method.deserializer(),
        decoder: &decoder,
        metrics: &*metrics,
        single_request,
        received: 0,
    };

    let status = loop {
        tokio::select! {
            item = responses.next() => match item {
                Some(Ok(Ok(response))) => {
                    let payload =
                        match encode_response(method.serializer(), response, max_send_message_size) {
                            Ok(payload) => payload,
                            Err(status) => break status,
                        };
                    if let Err(e) = writer.send_message(&payload).await {
                        break Status::from(e);
                    }
                    metrics.inc_messages_sent();
                }
                Some(Ok(Err(status))) => break status,
                Some(Err(panic)) => break Status::unknown(panic_message(&*panic)),
                None => break Status::ok(),
            },
            step = reader.read(&mut requests, tx.as_ref()), if tx.is_some() => match step {
                ReadStep::Continue => {}
                ReadStep::Finished => {
                    debug!(stream = %id, requests = reader.received, "request stream complete");
                    tx = None;
                }
                ReadStep::Failed(status) => break status,
            },
            reset = poll_fn(|cx| writer.poll_reset(cx)) => {
                debug!(stream = %id, error = %reset, "call reset by peer");
                break Status::from_transport_error(&reset);
            }
        }
    };

    // the handler is released before the status goes out
    drop(responses);
    drop(tx);

    let ok = status.is_ok();
    if ok {
        debug!(stream = %id, path = %path, "call completed");
    } else {
        warn!(
            stream = %id,
            path = %path,
            code = %status.code(),
            message = ?status.message(),
            "call failed"
        );
    }
    if let Err(e) = writer.finish(&status).await {
        debug!(stream = %id, error = %e, "could not deliver status");
    }
    metrics.call_finished(ok);
}

/// Start the handler, presenting every shape as a response sequence.
fn invoke<Req, Resp>(
    handler: Handler<Req, Resp>,
    requests: Streaming<Req>,
    context: RequestContext,
) -> ResponseStream<Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    match handler {
        Handler::Unary(f) => stream::once(async move {
            let request = only_request(requests).await?;
            f(request, context).await
        })
        .boxed(),
        Handler::ServerStreaming(f) => stream::once(async move {
            let request = only_request(requests).await?;
            f(request, context).await
        })
        .try_flatten()
        .boxed(),
        Handler::ClientStreaming(f) => {
            stream::once(async move { f(requests, context).await }).boxed()
        }
        Handler::BidiStreaming(f) => stream::once(async move { f(requests, context).await })
            .try_flatten()
            .boxed(),
    }
}

/// Wait for the single request of a unary-request call and for the client's
/// half-close behind it.
async fn only_request<Req>(mut requests: Streaming<Req>) -> Result<Req, Status> {
    let request = requests
        .message()
        .await?
        .ok_or_else(|| Status::invalid_argument("expected request message"))?;
    match requests.message().await? {
        None => Ok(request),
        Some(_) => Err(Status::invalid_argument("too many requests")),
    }
}

fn encode_response<Resp>(
    serialize: &Serializer<Resp>,
    response: Resp,
    limit: usize,
) -> Result<Bytes, Status> {
    let payload = match catch_unwind(AssertUnwindSafe(|| serialize(&response))) {
        Ok(result) => result?,
        Err(panic) => return Err(Status::unknown(panic_message(&*panic))),
    };
    if payload.len() > limit {
        return Err(Status::resource_exhausted(format!(
            "response of {} bytes exceeds the {limit} byte limit",
            payload.len()
        )));
    }
    Ok(payload)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

enum ReadStep {
    Continue,
    Finished,
    Failed(Status),
}

/// Moves decoded requests from the transport into the handler's channel.
struct RequestReader<'a, Req> {
    deserialize: &'a Deserializer<Req>,
    decoder: &'a MessageDecoder,
    metrics: &'a ServerMetrics,
    single_request: bool,
    received: usize,
}

impl<Req: Send> RequestReader<'_, Req> {
    /// Read and deliver one inbound item.
    ///
    /// A channel slot is reserved before reading so a request is never pulled
    /// off the transport without room for it; while the channel is full the
    /// inbound stream stays paused. Cancel-safe: nothing is consumed before
    /// the final await completes.
    async fn read(
        &mut self,
        requests: &mut Requests,
        tx: Option<&mpsc::Sender<Result<Req, Status>>>,
    ) -> ReadStep {
        let permit = match tx.map(mpsc::Sender::try_reserve) {
            Some(Ok(permit)) => Some(permit),
            Some(Err(TrySendError::Full(()))) => {
                let paused = Paused::new(requests);
                let permit = match tx {
                    Some(tx) => tx.reserve().await.ok(),
                    None => None,
                };
                drop(paused);
                permit
            }
            Some(Err(TrySendError::Closed(()))) | None => None,
        };

        match requests.next().await {
            Some(Ok(DecodedMessage::Data {
                payload,
                compressed,
            })) => {
                if self.single_request && self.received >= 1 {
                    return ReadStep::Failed(Status::invalid_argument("too many requests"));
                }
                let payload = match self.decoder.decompress(payload, compressed) {
                    Ok(payload) => payload,
                    Err(e) => return ReadStep::Failed(Status::from(e)),
                };
                self.received += 1;
                self.metrics.inc_messages_received();

                let deserialize = self.deserialize;
                let request = match catch_unwind(AssertUnwindSafe(|| deserialize(&payload[..]))) {
                    Ok(Ok(request)) => request,
                    Ok(Err(status)) => {
                        return ReadStep::Failed(Status::internal(format!(
                            "error deserializing request: {}",
                            status.message().unwrap_or_default()
                        )));
                    }
                    Err(panic) => {
                        return ReadStep::Failed(Status::internal(format!(
                            "error deserializing request: {}",
                            panic_message(&*panic)
                        )));
                    }
                };
                match permit {
                    Some(permit) => permit.send(Ok(request)),
                    None => debug!("handler stopped reading; request discarded"),
                }
                ReadStep::Continue
            }
            Some(Ok(DecodedMessage::Metadata(_))) => {
                debug!("ignoring header block inside request stream");
                ReadStep::Continue
            }
            None if self.single_request && self.received == 0 => {
                ReadStep::Failed(Status::invalid_argument("expected request message"))
            }
            None => ReadStep::Finished,
            Some(Err(GrpcError::Transport(e))) => {
                debug!(error = %e, "request stream aborted");
                ReadStep::Failed(Status::from_transport_error(&e))
            }
            Some(Err(e)) => ReadStep::Failed(Status::from(e)),
        }
    }
}

/// Keeps an inbound stream paused until dropped.
struct Paused<'a> {
    requests: &'a mut Requests,
}

impl<'a> Paused<'a> {
    fn new(requests: &'a mut Requests) -> Self {
        requests.get_ref().pause();
        Self { requests }
    }
}

impl Drop for Paused<'_> {
    fn drop(&mut self) {
        self.requests.get_ref().resume();
    }
}
