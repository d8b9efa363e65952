//! # grpcore Server
//!
//! Serves gRPC calls arriving on a multiplexed connection. Each logical
//! stream runs through a small state machine: the request header block is
//! routed through a read-only [`ServiceRegistry`], requests are decoded into
//! a bounded channel read by the handler, and responses are written back
//! followed by exactly one status.
//!
//! ## Handler shapes
//!
//! | Shape | Request | Response |
//! |---|---|---|
//! | [`Handler::Unary`] | one value | one value |
//! | [`Handler::ServerStreaming`] | one value | [`ResponseStream`] |
//! | [`Handler::ClientStreaming`] | [`Streaming`] | one value |
//! | [`Handler::BidiStreaming`] | [`Streaming`] | [`ResponseStream`] |
//!
//! Handlers fail by returning a [`Status`](grpcore_core::Status); a panic
//! inside a handler is reported to the client as `UNKNOWN`.
//!
//! ## Example
//!
//! ```rust
//! use grpcore_core::codec::{string_deserializer, string_serializer};
//! use grpcore_server::{MethodDescriptor, Server, ServiceDescriptor, ServiceRegistry};
//!
//! let greeter = ServiceDescriptor::new("helloworld.Greeter").method(MethodDescriptor::unary(
//!     "SayHello",
//!     string_deserializer(),
//!     string_serializer(),
//!     |name: String, _ctx| async move { Ok(format!("Hello {name}")) },
//! ));
//!
//! let server = Server::new(ServiceRegistry::builder().add_service(greeter).build());
//! assert_eq!(server.registry().method_count(), 1);
//! ```

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

pub mod config;
mod context;
mod dispatcher;
mod method;
mod metrics;
mod registry;
mod server;
mod streaming;

pub use config::{ConfigError, ServerConfig};
pub use context::RequestContext;
pub use dispatcher::ServerCall;
pub use method::{Handler, MethodDescriptor, ResponseStream, RpcMethod};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use registry::{RegistryBuilder, ServiceDescriptor, ServiceRegistry};
pub use server::{Server, ServerBuilder};
pub use streaming::Streaming;
