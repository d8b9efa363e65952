//! Header names and fixed values used on the wire.

/// `:method` pseudo-header.
pub const METHOD: &str = ":method";
/// `:scheme` pseudo-header.
pub const SCHEME: &str = ":scheme";
/// `:path` pseudo-header.
pub const PATH: &str = ":path";
/// `:authority` pseudo-header.
pub const AUTHORITY: &str = ":authority";
/// `:status` pseudo-header.
pub const STATUS: &str = ":status";

/// `content-type`
pub const CONTENT_TYPE: &str = "content-type";
/// `te`
pub const TE: &str = "te";
/// `user-agent`
pub const USER_AGENT: &str = "user-agent";

/// Deadline hint.
pub const GRPC_TIMEOUT: &str = "grpc-timeout";
/// Message encoding of the sender.
pub const GRPC_ENCODING: &str = "grpc-encoding";
/// Encodings the sender can decode.
pub const GRPC_ACCEPT_ENCODING: &str = "grpc-accept-encoding";
/// Final status code.
pub const GRPC_STATUS: &str = "grpc-status";
/// Percent-encoded status message.
pub const GRPC_MESSAGE: &str = "grpc-message";
/// Encoded `google.rpc.Status`.
pub const GRPC_STATUS_DETAILS: &str = "grpc-status-details-bin";

/// `content-type` value for gRPC.
pub const APPLICATION_GRPC: &str = "application/grpc";
/// `te` value required by gRPC.
pub const TRAILERS: &str = "trailers";

/// Headers the engine sets itself; caller metadata never overrides them.
pub const RESERVED: &[&str] = &[
    CONTENT_TYPE,
    TE,
    USER_AGENT,
    GRPC_TIMEOUT,
    GRPC_ENCODING,
    GRPC_ACCEPT_ENCODING,
    GRPC_STATUS,
    GRPC_MESSAGE,
    GRPC_STATUS_DETAILS,
];

/// Returns `true` for pseudo-headers and engine-owned headers.
pub fn is_reserved(key: &str) -> bool {
    key.starts_with(':') || RESERVED.iter().any(|r| r.eq_ignore_ascii_case(key))
}

/// Returns `true` if `content-type` names a gRPC payload
/// (`application/grpc` or `application/grpc+<subtype>`).
pub fn is_grpc_content_type(value: &str) -> bool {
    let value = value.trim();
    value
        .strip_prefix(APPLICATION_GRPC)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('+') || rest.starts_with(';'))
}
