//! Connection-level serving.

use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, instrument, warn};

use grpcore_core::transport::Acceptor;
use grpcore_core::{CompressionRegistry, Compressor};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::metrics::{MetricsSnapshot, ServerMetrics};
use crate::registry::ServiceRegistry;

/// A gRPC server: a frozen registry plus configuration.
///
/// Cheap to clone; clones share the registry and counters.
///
/// # Example
///
/// ```rust,ignore
/// let registry = ServiceRegistry::builder().add_service(greeter).build();
/// let server = Server::builder(registry)
///     .config(ServerConfig::builder().response_encoding("gzip").build())
///     .build();
///
/// server.serve_connection(acceptor).await;
/// ```
#[derive(Debug, Clone)]
pub struct Server {
    registry: Arc<ServiceRegistry>,
    config: Arc<ServerConfig>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<ServerMetrics>,
}

impl Server {
    /// A server with the default configuration.
    pub fn new(registry: ServiceRegistry) -> Self {
        Self::builder(registry).build()
    }

    /// Start configuring a server.
    pub fn builder(registry: ServiceRegistry) -> ServerBuilder {
        ServerBuilder {
            registry,
            config: ServerConfig::default(),
            compression: CompressionRegistry::default(),
        }
    }

    /// The registry calls are routed through.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Active configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Serve every logical stream the acceptor yields, one task per call,
    /// until the connection closes and all calls have finished.
    ///
    /// A panicking call task is logged and never affects its siblings.
    #[instrument(skip_all)]
    pub async fn serve_connection<A>(&self, mut acceptor: A)
    where
        A: Acceptor,
    {
        info!("serving connection");
        let mut calls = JoinSet::new();

        loop {
            tokio::select! {
                accepted = acceptor.accept() => match accepted {
                    Some(Ok(stream)) => {
                        debug!(stream = %stream.id, "stream accepted");
                        let dispatcher = Arc::clone(&self.dispatcher);
                        calls.spawn(async move { dispatcher.dispatch(stream).await });
                    }
                    Some(Err(e)) if e.is_connection_fatal() => {
                        warn!(error = %e, "connection failed");
                        break;
                    }
                    Some(Err(e)) => warn!(error = %e, "failed to accept stream"),
                    None => break,
                },
                Some(joined) = calls.join_next(), if !calls.is_empty() => log_join(joined),
            }
        }

        debug!(active = calls.len(), "connection closed, draining calls");
        while let Some(joined) = calls.join_next().await {
            log_join(joined);
        }
        info!("connection finished");
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            warn!("call task panicked");
        } else {
            debug!(error = %e, "call task cancelled");
        }
    }
}

/// Builder for [`Server`].
#[derive(Debug)]
pub struct ServerBuilder {
    registry: ServiceRegistry,
    config: ServerConfig,
    compression: CompressionRegistry,
}

impl ServerBuilder {
    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the set of codecs the server can decode and encode.
    #[must_use]
    pub fn compression(mut self, compression: CompressionRegistry) -> Self {
        self.compression = compression;
        self
    }

    /// Add one codec.
    #[must_use]
    pub fn compressor(mut self, codec: Arc<dyn Compressor>) -> Self {
        self.compression.register(codec);
        self
    }

    /// Freeze the registry and build the server.
    pub fn build(self) -> Server {
        let registry = Arc::new(self.registry);
        let config = Arc::new(self.config);
        let metrics = Arc::new(ServerMetrics::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&config),
            self.compression,
            Arc::clone(&metrics),
        ));
        Server {
            registry,
            config,
            dispatcher,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use grpcore_core::transport::{Connection, StreamEvent, memory};
    use grpcore_core::{Code, Metadata, Status, encode_frame};

    use crate::method::MethodDescriptor;
    use grpcore_core::codec::{string_deserializer, string_serializer};

    fn server() -> Server {
        let registry = ServiceRegistry::builder()
            .add_method(
                "helloworld.Greeter",
                MethodDescriptor::unary(
                    "SayHello",
                    string_deserializer(),
                    string_serializer(),
                    |name: String, _ctx| async move { Ok(format!("Hello {name}")) },
                ),
            )
            .build();
        Server::new(registry)
    }

    fn headers(path: &str) -> Metadata {
        let mut headers = Metadata::new();
        headers.append(":path", path);
        headers.append("content-type", "application/grpc");
        headers
    }

    async fn final_status(mut stream: grpcore_core::transport::LogicalStream) -> Status {
        let mut last = None;
        while let Some(event) = stream.inbound.next().await {
            if let StreamEvent::Headers(block) = event.unwrap() {
                last = Status::from_trailers(&block);
            }
        }
        last.unwrap()
    }

    #[tokio::test]
    async fn test_serves_until_connection_finishes() {
        let server = server();
        let (connection, acceptor) = memory::pair();
        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve_connection(acceptor).await }
        });

        let mut ok = connection
            .open_stream(headers("/helloworld.Greeter/SayHello"))
            .await
            .unwrap();
        ok.outbound
            .send_data(encode_frame(b"world", false), true)
            .await
            .unwrap();
        assert!(final_status(ok).await.is_ok());

        let missing = connection.open_stream(headers("/nope/nope")).await.unwrap();
        assert_eq!(final_status(missing).await.code(), Code::NotFound);

        connection.finish();
        serving.await.unwrap();

        let metrics = server.metrics();
        assert_eq!(metrics.calls_started, 2);
        assert_eq!(metrics.calls_succeeded, 1);
        assert_eq!(metrics.calls_failed, 1);
        assert_eq!(metrics.active_calls, 0);
        assert_eq!(server.registry().method_count(), 1);
    }
}
