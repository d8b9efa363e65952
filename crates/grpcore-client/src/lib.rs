//! # grpcore Client
//!
//! Starts gRPC calls over a multiplexed [`Connection`](grpcore_core::transport::Connection).
//!
//! - [`create_call_headers`] / [`HeaderTemplate`]: the request header block
//! - [`Client::make_request`]: a raw [`CallStream`] with framing and
//!   compression on both halves
//! - [`Client::unary`], [`Client::server_streaming`],
//!   [`Client::client_streaming`], [`Client::bidi_streaming`]: typed calls
//!   over a [`ClientMethod`]
//!
//! Every call ends with a [`Status`](grpcore_core::Status) read from the
//! trailers (or a trailers-only response). A call that ends without
//! `grpc-status` fails with `INTERNAL`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use grpcore_client::{CallOptions, Client, ClientMethod};
//! use grpcore_core::codec::{string_deserializer, string_serializer};
//!
//! let client = Client::connect(&connector, &endpoint, ChannelOptions::default()).await?;
//! let say_hello = ClientMethod::new(
//!     "/helloworld.Greeter/SayHello",
//!     string_serializer(),
//!     string_deserializer(),
//! );
//! let reply = client.unary(&say_hello, &"world".to_string(), CallOptions::new()).await?;
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

mod call;
mod client;
mod headers;

pub use call::{CallReceiver, CallSender, CallStream};
pub use client::{CallOptions, Client, ClientMethod, Requests, Responses};
pub use headers::{HeaderTemplate, create_call_headers};
