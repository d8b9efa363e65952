//! # grpcore
//!
//! A gRPC protocol engine that runs over any multiplexed connection.
//!
//! The engine is split into crates that this facade re-exports:
//!
//! - **[`transport`]**: the connection contract (`Connection`, `Acceptor`,
//!   `Connector`) and channel options
//! - **Core**: [`Status`] and [`Code`], the length-prefixed frame codec,
//!   the compression layer and `grpc-timeout` encoding
//! - **[`server`]**: the per-call dispatch state machine behind a
//!   [`ServiceRegistry`]
//! - **[`client`]**: call construction and the four typed call shapes
//! - **`h2`** (feature `h2`, default): HTTP/2 over TCP with optional rustls
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use grpcore::prelude::*;
//! use grpcore::codec::{string_deserializer, string_serializer};
//!
//! let greeter = ServiceDescriptor::new("helloworld.Greeter").method(MethodDescriptor::unary(
//!     "SayHello",
//!     string_deserializer(),
//!     string_serializer(),
//!     |name: String, _ctx| async move { Ok(format!("Hello {name}")) },
//! ));
//! let server = Server::new(ServiceRegistry::builder().add_service(greeter).build());
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:50051").await?;
//! tokio::spawn(grpcore::h2::serve(listener, server));
//!
//! let client = Client::connect(
//!     &grpcore::h2::H2Connector::new(),
//!     &Endpoint::new("127.0.0.1", 50051),
//!     ChannelOptions::default(),
//! )
//! .await?;
//! let say_hello = ClientMethod::new(
//!     "/helloworld.Greeter/SayHello",
//!     string_serializer(),
//!     string_deserializer(),
//! );
//! let reply = client.unary(&say_hello, &"world".to_string(), CallOptions::new()).await?;
//! assert_eq!(reply, "Hello world");
//! ```
//!
//! ## Feature Flags
//!
//! - `h2` (default): HTTP/2 connector, acceptor and serve loops
//! - `gzip` (default): the `gzip` message codec
//! - `memory`: in-process connection pairs for tests

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

pub use grpcore_core::{
    Code, CompressionRegistry, Compressor, DecodedMessage, Deserializer, ErrorDetail, Frame,
    FrameDecoder, FrameError, GrpcError, GrpcResult, MessageDecoder, MessageEncoder, Metadata,
    Serializer, Status, codec, compression, decode, details, encode_frame, encode_timeout,
    headers, parse_timeout,
};

#[cfg(feature = "gzip")]
#[cfg_attr(docsrs, doc(cfg(feature = "gzip")))]
pub use grpcore_core::Gzip;

pub use grpcore_transport_traits as transport;

/// Server-side dispatch.
pub mod server {
    pub use grpcore_server::*;
}

/// Client-side calls.
pub mod client {
    pub use grpcore_client::*;
}

pub use grpcore_client::{CallOptions, Client, ClientMethod};
pub use grpcore_server::{
    MethodDescriptor, RequestContext, Server, ServerConfig, ServiceDescriptor, ServiceRegistry,
    Streaming,
};

#[cfg(feature = "h2")]
#[cfg_attr(docsrs, doc(cfg(feature = "h2")))]
pub use grpcore_h2 as h2;

/// Prelude of the types most programs need.
pub mod prelude {
    pub use crate::client::{CallOptions, Client, ClientMethod, Requests, Responses};
    pub use crate::server::{
        MethodDescriptor, RequestContext, ResponseStream, Server, ServerConfig,
        ServiceDescriptor, ServiceRegistry, Streaming,
    };
    pub use crate::transport::{ChannelOptions, Connection, Connector, Credentials, Endpoint};
    pub use crate::{Code, Metadata, Status};
}
