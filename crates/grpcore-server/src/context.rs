//! Per-call information handed to handlers.

use std::time::Duration;

use grpcore_core::Metadata;
use grpcore_core::transport::StreamId;

/// What a handler knows about the call it is serving.
#[derive(Debug, Clone)]
pub struct RequestContext {
    stream_id: StreamId,
    path: String,
    service: String,
    method: String,
    metadata: Metadata,
    deadline: Option<Duration>,
    encoding: Option<String>,
}

impl RequestContext {
    pub(crate) fn new(
        stream_id: StreamId,
        path: &str,
        service: &str,
        method: &str,
        metadata: Metadata,
        deadline: Option<Duration>,
        encoding: Option<String>,
    ) -> Self {
        Self {
            stream_id,
            path: path.to_string(),
            service: service.to_string(),
            method: method.to_string(),
            metadata,
            deadline,
            encoding,
        }
    }

    /// Transport stream carrying the call.
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Full `:path`, e.g. `/helloworld.Greeter/SayHello`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Service segment of the path.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Method segment of the path.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request headers, pseudo-headers excluded.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The caller's `grpc-timeout` hint. Advisory: the engine does not
    /// enforce it.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// The caller's `grpc-encoding`, if any.
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }
}
