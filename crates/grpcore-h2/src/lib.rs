//! # grpcore HTTP/2
//!
//! Binds the grpcore transport contract to real HTTP/2 connections using the
//! [`h2`] crate:
//!
//! - [`H2Connector`] dials TCP, optionally wrapped in rustls with ALPN `h2`
//! - [`H2Connection`] is the client [`Connection`](grpcore_transport_traits::Connection)
//! - [`H2Acceptor`] is the server [`Acceptor`](grpcore_transport_traits::Acceptor)
//!   over any `AsyncRead + AsyncWrite` byte stream
//! - [`serve`], [`serve_with_shutdown`] and [`serve_tls`] run a
//!   [`Server`](grpcore_server::Server) on a TCP listener
//!
//! Pausing an inbound stream withholds the flow-control window from the
//! peer; resuming releases everything withheld.
//!
//! ## Example
//!
//! ```rust,ignore
//! use grpcore_h2::{H2Connector, serve};
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:50051").await?;
//! tokio::spawn(serve(listener, server));
//!
//! let client = Client::connect(&H2Connector::new(), &endpoint, ChannelOptions::default()).await?;
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

pub mod tls;

mod client;
mod convert;
mod server;
mod stream;

pub use client::{H2Connection, H2Connector};
pub use server::{H2Acceptor, serve, serve_tls, serve_with_shutdown};
pub use tokio_rustls::TlsAcceptor;
pub use tokio_rustls::rustls;
