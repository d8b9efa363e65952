//! Message serialization hooks.
//!
//! The engine is schema-agnostic: callers supply pure functions turning
//! typed messages into bytes and back. Helpers for `prost` messages and raw
//! bytes are provided.

use std::sync::Arc;

use bytes::Bytes;

use crate::status::Status;

/// Turns a message into its wire bytes.
pub type Serializer<T> = Arc<dyn Fn(&T) -> Result<Bytes, Status> + Send + Sync>;

/// Parses wire bytes into a message.
pub type Deserializer<T> = Arc<dyn Fn(&[u8]) -> Result<T, Status> + Send + Sync>;

/// Serializer for `prost` messages.
pub fn prost_serializer<T>() -> Serializer<T>
where
    T: prost::Message + 'static,
{
    Arc::new(|message: &T| Ok(Bytes::from(message.encode_to_vec())))
}

/// Deserializer for `prost` messages.
pub fn prost_deserializer<T>() -> Deserializer<T>
where
    T: prost::Message + Default + 'static,
{
    Arc::new(|bytes: &[u8]| {
        T::decode(bytes).map_err(|e| Status::internal(format!("invalid protobuf message: {e}")))
    })
}

/// Serializer passing raw bytes through.
pub fn bytes_serializer() -> Serializer<Bytes> {
    Arc::new(|message: &Bytes| Ok(message.clone()))
}

/// Deserializer passing raw bytes through.
pub fn bytes_deserializer() -> Deserializer<Bytes> {
    Arc::new(|bytes: &[u8]| Ok(Bytes::copy_from_slice(bytes)))
}

/// Serializer for UTF-8 strings.
pub fn string_serializer() -> Serializer<String> {
    Arc::new(|message: &String| Ok(Bytes::copy_from_slice(message.as_bytes())))
}

/// Deserializer for UTF-8 strings.
pub fn string_deserializer() -> Deserializer<String> {
    Arc::new(|bytes: &[u8]| {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Status::internal(format!("invalid UTF-8 message: {e}")))
    })
}
