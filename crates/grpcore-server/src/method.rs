//! Method descriptors and handler shapes.
//!
//! A [`MethodDescriptor`] binds a method name to its serializers and to a
//! [`Handler`] in one of the four call shapes. Descriptors are stored in the
//! registry behind the object-safe [`RpcMethod`] trait, so the per-call
//! state machine is instantiated for the concrete request and response types
//! of each method without any runtime type tests.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::Stream;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use grpcore_core::{Deserializer, Serializer, Status};

use crate::context::RequestContext;
use crate::dispatcher::{self, ServerCall};
use crate::streaming::Streaming;

/// Responses produced by a streaming-response handler.
pub type ResponseStream<Resp> = BoxStream<'static, Result<Resp, Status>>;

type UnaryFn<Req, Resp> =
    dyn Fn(Req, RequestContext) -> BoxFuture<'static, Result<Resp, Status>> + Send + Sync;
type ServerStreamingFn<Req, Resp> = dyn Fn(Req, RequestContext) -> BoxFuture<'static, Result<ResponseStream<Resp>, Status>>
    + Send
    + Sync;
type ClientStreamingFn<Req, Resp> =
    dyn Fn(Streaming<Req>, RequestContext) -> BoxFuture<'static, Result<Resp, Status>> + Send + Sync;
type BidiStreamingFn<Req, Resp> = dyn Fn(
        Streaming<Req>,
        RequestContext,
    ) -> BoxFuture<'static, Result<ResponseStream<Resp>, Status>>
    + Send
    + Sync;

/// A handler in one of the four call shapes.
pub enum Handler<Req, Resp> {
    /// Single request, single response.
    Unary(Arc<UnaryFn<Req, Resp>>),
    /// Single request, response sequence.
    ServerStreaming(Arc<ServerStreamingFn<Req, Resp>>),
    /// Request sequence, single response.
    ClientStreaming(Arc<ClientStreamingFn<Req, Resp>>),
    /// Request sequence, response sequence.
    BidiStreaming(Arc<BidiStreamingFn<Req, Resp>>),
}

impl<Req, Resp> Handler<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Wrap a unary handler.
    pub fn unary<F, Fut>(f: F) -> Self
    where
        F: Fn(Req, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        Self::Unary(Arc::new(
            move |req: Req, ctx: RequestContext| -> BoxFuture<'static, Result<Resp, Status>> {
                Box::pin(f(req, ctx))
            },
        ))
    }

    /// Wrap a server-streaming handler.
    pub fn server_streaming<F, Fut, S>(f: F) -> Self
    where
        F: Fn(Req, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, Status>> + Send + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
    {
        Self::ServerStreaming(Arc::new(
            move |req: Req,
                  ctx: RequestContext|
                  -> BoxFuture<'static, Result<ResponseStream<Resp>, Status>> {
                let fut = f(req, ctx);
                Box::pin(async move { fut.await.map(|s| Box::pin(s) as ResponseStream<Resp>) })
            },
        ))
    }

    /// Wrap a client-streaming handler.
    pub fn client_streaming<F, Fut>(f: F) -> Self
    where
        F: Fn(Streaming<Req>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        Self::ClientStreaming(Arc::new(
            move |requests: Streaming<Req>,
                  ctx: RequestContext|
                  -> BoxFuture<'static, Result<Resp, Status>> {
                Box::pin(f(requests, ctx))
            },
        ))
    }

    /// Wrap a bidirectional-streaming handler.
    pub fn bidi_streaming<F, Fut, S>(f: F) -> Self
    where
        F: Fn(Streaming<Req>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, Status>> + Send + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
    {
        Self::BidiStreaming(Arc::new(
            move |requests: Streaming<Req>,
                  ctx: RequestContext|
                  -> BoxFuture<'static, Result<ResponseStream<Resp>, Status>> {
                let fut = f(requests, ctx);
                Box::pin(async move { fut.await.map(|s| Box::pin(s) as ResponseStream<Resp>) })
            },
        ))
    }
}

impl<Req, Resp> Handler<Req, Resp> {
    /// Whether the handler takes a request sequence.
    pub fn request_streaming(&self) -> bool {
        matches!(self, Self::ClientStreaming(_) | Self::BidiStreaming(_))
    }

    /// Whether the handler produces a response sequence.
    pub fn response_streaming(&self) -> bool {
        matches!(self, Self::ServerStreaming(_) | Self::BidiStreaming(_))
    }
}

impl<Req, Resp> Clone for Handler<Req, Resp> {
    fn clone(&self) -> Self {
        match self {
            Self::Unary(f) => Self::Unary(Arc::clone(f)),
            Self::ServerStreaming(f) => Self::ServerStreaming(Arc::clone(f)),
            Self::ClientStreaming(f) => Self::ClientStreaming(Arc::clone(f)),
            Self::BidiStreaming(f) => Self::BidiStreaming(Arc::clone(f)),
        }
    }
}

impl<Req, Resp> fmt::Debug for Handler<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self {
            Self::Unary(_) => "Unary",
            Self::ServerStreaming(_) => "ServerStreaming",
            Self::ClientStreaming(_) => "ClientStreaming",
            Self::BidiStreaming(_) => "BidiStreaming",
        };
        f.write_str(shape)
    }
}

/// A method: name, serializers, and handler. Immutable once built.
pub struct MethodDescriptor<Req, Resp> {
    name: String,
    deserialize: Deserializer<Req>,
    serialize: Serializer<Resp>,
    handler: Handler<Req, Resp>,
}

impl<Req, Resp> MethodDescriptor<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Create a descriptor from its parts.
    pub fn new(
        name: impl Into<String>,
        deserialize: Deserializer<Req>,
        serialize: Serializer<Resp>,
        handler: Handler<Req, Resp>,
    ) -> Self {
        Self {
            name: name.into(),
            deserialize,
            serialize,
            handler,
        }
    }

    /// Unary method.
    pub fn unary<F, Fut>(
        name: impl Into<String>,
        deserialize: Deserializer<Req>,
        serialize: Serializer<Resp>,
        f: F,
    ) -> Self
    where
        F: Fn(Req, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        Self::new(name, deserialize, serialize, Handler::unary(f))
    }

    /// Server-streaming method.
    pub fn server_streaming<F, Fut, S>(
        name: impl Into<String>,
        deserialize: Deserializer<Req>,
        serialize: Serializer<Resp>,
        f: F,
    ) -> Self
    where
        F: Fn(Req, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, Status>> + Send + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
    {
        Self::new(name, deserialize, serialize, Handler::server_streaming(f))
    }

    /// Client-streaming method.
    pub fn client_streaming<F, Fut>(
        name: impl Into<String>,
        deserialize: Deserializer<Req>,
        serialize: Serializer<Resp>,
        f: F,
    ) -> Self
    where
        F: Fn(Streaming<Req>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        Self::new(name, deserialize, serialize, Handler::client_streaming(f))
    }

    /// Bidirectional-streaming method.
    pub fn bidi_streaming<F, Fut, S>(
        name: impl Into<String>,
        deserialize: Deserializer<Req>,
        serialize: Serializer<Resp>,
        f: F,
    ) -> Self
    where
        F: Fn(Streaming<Req>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, Status>> + Send + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
    {
        Self::new(name, deserialize, serialize, Handler::bidi_streaming(f))
    }
}

impl<Req, Resp> MethodDescriptor<Req, Resp> {
    /// Method name (the last path segment).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The request deserializer.
    pub fn deserializer(&self) -> &Deserializer<Req> {
        &self.deserialize
    }

    /// The response serializer.
    pub fn serializer(&self) -> &Serializer<Resp> {
        &self.serialize
    }

    /// The handler.
    pub fn handler(&self) -> &Handler<Req, Resp> {
        &self.handler
    }
}

impl<Req, Resp> fmt::Debug for MethodDescriptor<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

/// Type-erased view of a [`MethodDescriptor`], as stored in the registry.
pub trait RpcMethod: Send + Sync + fmt::Debug {
    /// Method name.
    fn name(&self) -> &str;

    /// Whether the method takes a request sequence.
    fn request_streaming(&self) -> bool;

    /// Whether the method produces a response sequence.
    fn response_streaming(&self) -> bool;

    /// Drive one call from the active state to completion.
    fn serve(self: Arc<Self>, call: ServerCall) -> BoxFuture<'static, ()>;
}

impl<Req, Resp> RpcMethod for MethodDescriptor<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn request_streaming(&self) -> bool {
        self.handler.request_streaming()
    }

    fn response_streaming(&self) -> bool {
        self.handler.response_streaming()
    }

    fn serve(self: Arc<Self>, call: ServerCall) -> BoxFuture<'static, ()> {
        Box::pin(dispatcher::run_active(self, call))
    }
}
