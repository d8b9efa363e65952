//! Per-message compression.
//!
//! Encodings are negotiated through `grpc-encoding` and
//! `grpc-accept-encoding`. `identity` is always available and never
//! registered explicitly; other codecs are pluggable [`Compressor`]s.

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{GrpcError, GrpcResult};
use crate::frame::{DecodedMessage, encode_frame};

/// The no-op encoding.
pub const IDENTITY: &str = "identity";

/// The gzip encoding name.
pub const GZIP: &str = "gzip";

/// A named compression algorithm.
pub trait Compressor: Send + Sync + fmt::Debug {
    /// Encoding name as it appears in `grpc-encoding`.
    fn name(&self) -> &'static str;

    /// Compress a payload.
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    /// Decompress a payload, failing if the output would exceed `limit` bytes.
    fn decompress(&self, data: &[u8], limit: usize) -> io::Result<Vec<u8>>;
}

/// Read at most `limit` bytes from a decompressing reader.
pub fn read_limited(reader: impl Read, limit: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("decompressed message exceeds the {limit} byte limit"),
        ));
    }
    Ok(out)
}

/// gzip via `flate2`.
#[cfg(feature = "gzip")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Gzip {
    level: Option<u32>,
}

#[cfg(feature = "gzip")]
impl Gzip {
    /// gzip at an explicit level (0-9).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Some(level.min(9)),
        }
    }
}

#[cfg(feature = "gzip")]
impl Compressor for Gzip {
    fn name(&self) -> &'static str {
        GZIP
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        use std::io::Write;

        let level = self
            .level
            .map_or_else(flate2::Compression::default, flate2::Compression::new);
        let mut encoder = flate2::write::GzEncoder::new(Vec::with_capacity(data.len() / 2), level);
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn decompress(&self, data: &[u8], limit: usize) -> io::Result<Vec<u8>> {
        read_limited(flate2::read::GzDecoder::new(data), limit)
    }
}

/// The set of codecs one side can use.
#[derive(Debug, Clone)]
pub struct CompressionRegistry {
    codecs: Vec<Arc<dyn Compressor>>,
}

impl Default for CompressionRegistry {
    /// Identity plus every codec compiled in.
    fn default() -> Self {
        let mut registry = Self::identity_only();
        #[cfg(feature = "gzip")]
        registry.register(Arc::new(Gzip::default()));
        registry
    }
}

impl CompressionRegistry {
    /// A registry that only knows `identity`.
    pub fn identity_only() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Register a codec, replacing any codec with the same name.
    pub fn register(&mut self, codec: Arc<dyn Compressor>) {
        self.codecs.retain(|c| c.name() != codec.name());
        self.codecs.push(codec);
    }

    /// Look up a codec by encoding name. `identity` has no codec.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Compressor>> {
        let name = name.trim();
        self.codecs
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Returns `true` if `name` is `identity` or a registered codec.
    pub fn supports(&self, name: &str) -> bool {
        name.trim().eq_ignore_ascii_case(IDENTITY) || self.get(name).is_some()
    }

    /// Value for `grpc-accept-encoding`: `identity` followed by registered
    /// codec names.
    pub fn accept_encoding(&self) -> String {
        std::iter::once(IDENTITY)
            .chain(self.codecs.iter().map(|c| c.name()))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Choose the codec for outbound messages: `preferred`, if the peer's
    /// `grpc-accept-encoding` lists it and it is registered here.
    pub fn negotiate(
        &self,
        preferred: Option<&str>,
        peer_accepts: Option<&str>,
    ) -> Option<Arc<dyn Compressor>> {
        let preferred = preferred?;
        let accepted = peer_accepts?
            .split(',')
            .any(|name| name.trim().eq_ignore_ascii_case(preferred));
        if accepted { self.get(preferred) } else { None }
    }
}

/// Compresses (when configured) and frames outbound messages.
#[derive(Debug, Clone, Default)]
pub struct MessageEncoder {
    codec: Option<Arc<dyn Compressor>>,
    min_size: usize,
}

impl MessageEncoder {
    /// An encoder that never compresses.
    pub fn identity() -> Self {
        Self::default()
    }

    /// An encoder compressing payloads of at least `min_size` bytes.
    pub fn new(codec: Option<Arc<dyn Compressor>>, min_size: usize) -> Self {
        Self { codec, min_size }
    }

    /// The encoding name to announce in `grpc-encoding`, if compressing.
    pub fn encoding(&self) -> Option<&'static str> {
        self.codec.as_ref().map(|c| c.name())
    }

    /// Produce the wire frame for one serialized message.
    pub fn encode(&self, payload: &[u8]) -> GrpcResult<Bytes> {
        match &self.codec {
            Some(codec) if payload.len() >= self.min_size => {
                let compressed = codec
                    .compress(payload)
                    .map_err(|e| GrpcError::Compression(e.to_string()))?;
                Ok(encode_frame(&compressed, true))
            }
            _ => Ok(encode_frame(payload, false)),
        }
    }
}

/// Decompresses inbound messages flagged as compressed.
#[derive(Debug, Clone)]
pub struct MessageDecoder {
    registry: CompressionRegistry,
    encoding: Option<String>,
    max_message_size: usize,
}

impl MessageDecoder {
    /// Create a decoder resolving codecs from `registry`.
    pub fn new(registry: CompressionRegistry, max_message_size: usize) -> Self {
        Self {
            registry,
            encoding: None,
            max_message_size,
        }
    }

    /// Record the peer's `grpc-encoding`.
    pub fn set_encoding(&mut self, encoding: Option<&str>) {
        self.encoding = encoding.map(|e| e.trim().to_ascii_lowercase());
    }

    /// The peer's announced encoding.
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// Decompress one payload if its flag is set.
    pub fn decompress(&self, payload: Bytes, compressed: bool) -> GrpcResult<Bytes> {
        if !compressed {
            return Ok(payload);
        }
        let name = match self.encoding.as_deref() {
            None | Some(IDENTITY) => {
                return Err(GrpcError::UnsupportedEncoding(
                    "compressed message without grpc-encoding".to_string(),
                ));
            }
            Some(name) => name,
        };
        let codec = self
            .registry
            .get(name)
            .ok_or_else(|| GrpcError::UnsupportedEncoding(name.to_string()))?;
        codec
            .decompress(&payload, self.max_message_size)
            .map(Bytes::from)
            .map_err(|e| GrpcError::Compression(e.to_string()))
    }

    /// Apply [`decompress`](Self::decompress) to a decoded item, leaving
    /// metadata untouched.
    pub fn process(&self, message: DecodedMessage) -> GrpcResult<DecodedMessage> {
        match message {
            DecodedMessage::Data {
                payload,
                compressed,
            } => Ok(DecodedMessage::Data {
                payload: self.decompress(payload, compressed)?,
                compressed: false,
            }),
            metadata @ DecodedMessage::Metadata(_) => Ok(metadata),
        }
    }
}
