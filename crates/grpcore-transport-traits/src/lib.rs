//! # grpcore Transport Traits
//!
//! The multiplexed-connection contract the grpcore engine is written against.
//! This crate provides the foundational abstractions that every connection
//! binding (HTTP/2 over TCP, TLS, or in-process) implements.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Traits**: [`Connection`], [`Acceptor`], [`Connector`], [`InboundStream`], [`OutboundStream`]
//! - **Types**: [`LogicalStream`], [`StreamEvent`], [`Metadata`], [`Endpoint`], [`ConnectionState`]
//! - **Errors**: [`TransportError`], [`TransportResult`]
//! - **Config**: [`ChannelOptions`], [`Credentials`], [`TlsConfig`]
//!
//! With the `memory` feature, [`memory`] provides an in-process connection
//! pair used by the engine's tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use grpcore_transport_traits::{Connection, Metadata, StreamEvent};
//! use futures::StreamExt;
//!
//! let mut stream = connection.open_stream(headers).await?;
//! stream.outbound.send_data(body, true).await?;
//! while let Some(event) = stream.inbound.next().await {
//!     match event? {
//!         StreamEvent::Headers(md) => { /* response headers or trailers */ }
//!         StreamEvent::Data(chunk) => { /* body bytes */ }
//!     }
//! }
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

mod config;
mod error;
mod events;
mod metadata;
mod traits;
mod types;

#[cfg(feature = "memory")]
#[cfg_attr(docsrs, doc(cfg(feature = "memory")))]
pub mod memory;

// Re-export all public items
pub use config::{CertificateCheck, ChannelOptions, Credentials, TlsConfig, TlsVersion};
pub use error::{TransportError, TransportResult};
pub use events::{CloseReason, StreamEvent};
pub use metadata::{BINARY_SUFFIX, Metadata};
pub use traits::{
    Acceptor, BoxFuture, Connection, Connector, InboundStream, LogicalStream, OutboundStream,
};
pub use types::{ConnectionState, Endpoint, StreamId};
