//! Shared fixtures for the end-to-end suites.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Once};

use bytes::Bytes;
use futures::StreamExt;
use tokio::task::JoinHandle;

use grpcore::codec::{string_deserializer, string_serializer};
use grpcore::details::ErrorInfo;
use grpcore::prelude::*;
use grpcore::transport::memory::{self, MemoryConnection};
use grpcore::transport::{LogicalStream, StreamEvent};
use grpcore::{ErrorDetail, encode_frame};

pub const SERVICE: &str = "helloworld.Greeter";

static TRACING: Once = Once::new();

/// Route engine logs through the test harness. `RUST_LOG` picks the level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// The greeter used across suites.
///
/// - `SayHello`: unary, `"world"` -> `"Hello world"`
/// - `Countdown`: server streaming, `"3"` -> `"3"`, `"2"`, `"1"`
/// - `Join`: client streaming, joins every request with `,`
/// - `Echo`: bidi, answers each request with `"echo {request}"`
/// - `Fail`: unary, `FAILED_PRECONDITION` with an `ErrorInfo` detail
/// - `Panic`: unary, the handler panics
/// - `WhoAmI`: unary, returns the `x-user` request metadata
pub fn greeter() -> ServiceDescriptor {
    ServiceDescriptor::new(SERVICE)
        .method(MethodDescriptor::unary(
            "SayHello",
            string_deserializer(),
            string_serializer(),
            |name: String, _ctx| async move { Ok(format!("Hello {name}")) },
        ))
        .method(MethodDescriptor::server_streaming(
            "Countdown",
            string_deserializer(),
            string_serializer(),
            |from: String, _ctx| async move {
                let from: u32 = from
                    .parse()
                    .map_err(|_| Status::invalid_argument(format!("not a number: {from}")))?;
                Ok::<_, Status>(futures::stream::iter(
                    (1..=from).rev().map(|n| Ok(n.to_string())),
                ))
            },
        ))
        .method(MethodDescriptor::client_streaming(
            "Join",
            string_deserializer(),
            string_serializer(),
            |requests: Streaming<String>, _ctx| async move {
                let parts: Vec<String> = requests
                    .collect::<Vec<_>>()
                    .await
                    .into_iter()
                    .collect::<Result<_, _>>()?;
                Ok::<_, Status>(parts.join(","))
            },
        ))
        .method(MethodDescriptor::bidi_streaming(
            "Echo",
            string_deserializer(),
            string_serializer(),
            |requests: Streaming<String>, _ctx| async move {
                Ok(requests.map(|request| request.map(|text| format!("echo {text}"))))
            },
        ))
        .method(MethodDescriptor::unary(
            "Fail",
            string_deserializer(),
            string_serializer(),
            |_: String, _ctx| async move {
                Err::<String, _>(Status::with_details(
                    Code::FailedPrecondition,
                    "greeter is closed",
                    [ErrorDetail::ErrorInfo(ErrorInfo {
                        reason: "CLOSED".to_string(),
                        domain: "greeter.example.com".to_string(),
                        metadata: HashMap::from([("opens".to_string(), "09:00".to_string())]),
                    })],
                ))
            },
        ))
        .method(MethodDescriptor::unary(
            "Panic",
            string_deserializer(),
            string_serializer(),
            |_: String, _ctx| async move {
                if true {
                    panic!("kaboom");
                }
                Ok(String::new())
            },
        ))
        .method(MethodDescriptor::unary(
            "WhoAmI",
            string_deserializer(),
            string_serializer(),
            |_: String, ctx: RequestContext| async move {
                Ok(ctx.metadata().get("x-user").unwrap_or("anonymous").to_string())
            },
        ))
}

/// Client-side handle for a greeter method.
pub fn method(name: &str) -> ClientMethod<String, String> {
    ClientMethod::new(
        format!("/{SERVICE}/{name}"),
        string_serializer(),
        string_deserializer(),
    )
}

/// Request header block for calls driven below the client API.
pub fn request_headers(path: &str) -> Metadata {
    [
        (":method", "POST"),
        (":scheme", "http"),
        (":path", path),
        (":authority", "localhost"),
        ("content-type", "application/grpc"),
        ("te", "trailers"),
    ]
    .into_iter()
    .collect()
}

/// Send `body` as the whole request of a raw stream and return the
/// `grpc-status` the server answered with.
pub async fn raw_call(connection: &MemoryConnection, headers: Metadata, body: Bytes) -> String {
    let LogicalStream {
        mut inbound,
        mut outbound,
        ..
    } = connection.open_stream(headers).await.unwrap();
    let _ = outbound.send_data(body, true).await;

    let mut status = None;
    while let Some(event) = inbound.next().await {
        if let Ok(StreamEvent::Headers(block)) = event {
            if let Some(code) = block.get("grpc-status") {
                status = Some(code.to_string());
            }
        }
    }
    status.unwrap_or_default()
}

/// One framed, uncompressed string message.
pub fn frame(text: &str) -> Bytes {
    encode_frame(text.as_bytes(), false)
}

/// A server and a client joined by an in-process connection.
pub struct Harness {
    pub client: Client,
    pub server: Server,
    pub connection: Arc<MemoryConnection>,
    serving: JoinHandle<()>,
}

impl Harness {
    /// Greeter server with the default configuration.
    pub fn start() -> Self {
        Self::with_server(Server::new(
            ServiceRegistry::builder().add_service(greeter()).build(),
        ))
    }

    pub fn with_server(server: Server) -> Self {
        Self::with_options(server, ChannelOptions::default())
    }

    pub fn with_options(server: Server, options: ChannelOptions) -> Self {
        init_tracing();
        let (connection, acceptor) = memory::pair();
        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve_connection(acceptor).await }
        });
        let dyn_connection: Arc<dyn Connection> = connection.clone();
        let client = Client::new(dyn_connection, "localhost", options);
        Self {
            client,
            server,
            connection,
            serving,
        }
    }

    /// Finish the connection and wait for every call to drain.
    pub async fn shutdown(self) {
        self.client.finish();
        self.serving.await.unwrap();
    }
}
