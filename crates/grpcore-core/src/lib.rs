//! # grpcore Core
//!
//! Protocol building blocks shared by the grpcore client and server:
//!
//! - **Status Model**: [`Code`], [`Status`], and typed [`details`] records
//! - **Frame Codec**: [`encode_frame`], [`FrameDecoder`], and the [`decode`]
//!   stream adapter yielding [`DecodedMessage`]s
//! - **Compression Layer**: [`Compressor`], [`CompressionRegistry`],
//!   [`MessageEncoder`], [`MessageDecoder`]
//! - **Deadline hints**: [`encode_timeout`] / [`parse_timeout`]
//! - **Errors**: [`GrpcError`], [`GrpcResult`], mapped onto [`Status`]
//!
//! ## Example
//!
//! ```rust
//! use grpcore_core::{Code, Status, encode_frame, FrameDecoder};
//!
//! let frame = encode_frame(b"hello", false);
//! let mut decoder = FrameDecoder::new();
//! decoder.feed(&frame);
//! let decoded = decoder.decode_frame().unwrap().unwrap();
//! assert_eq!(&decoded.payload[..], b"hello");
//!
//! let status = Status::not_found("no such method");
//! assert_eq!(status.code(), Code::NotFound);
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

pub mod codec;
pub mod compression;
pub mod details;
pub mod headers;

mod code;
mod error;
mod frame;
mod status;
mod timeout;

pub use code::Code;
pub use codec::{Deserializer, Serializer};
#[cfg(feature = "gzip")]
pub use compression::Gzip;
pub use compression::{
    CompressionRegistry, Compressor, GZIP, IDENTITY, MessageDecoder, MessageEncoder,
};
pub use details::ErrorDetail;
pub use error::{GrpcError, GrpcResult};
pub use frame::{
    DEFAULT_MAX_MESSAGE_SIZE, DecodedMessage, Frame, FrameDecoder, FrameError, FramedStream,
    HEADER_SIZE, decode, encode_frame,
};
pub use status::Status;
pub use timeout::{encode_timeout, parse_timeout};

// The transport contract is part of this crate's public API.
pub use grpcore_transport_traits as transport;
pub use grpcore_transport_traits::Metadata;
