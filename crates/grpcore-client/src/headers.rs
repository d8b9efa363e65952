//! Request header construction.

use std::time::Duration;

use grpcore_core::headers::{
    APPLICATION_GRPC, AUTHORITY, CONTENT_TYPE, GRPC_ACCEPT_ENCODING, GRPC_ENCODING, GRPC_TIMEOUT,
    METHOD, PATH, SCHEME, TE, TRAILERS, USER_AGENT, is_reserved,
};
use grpcore_core::{CompressionRegistry, Metadata, encode_timeout};
use tracing::debug;

/// The per-channel part of every request header block.
#[derive(Debug, Clone)]
pub struct HeaderTemplate {
    scheme: &'static str,
    authority: String,
    user_agent: String,
    accept_encoding: String,
    send_encoding: Option<String>,
}

impl HeaderTemplate {
    /// Template for a channel to `authority`, with `https` when `secure`.
    pub fn new(secure: bool, authority: impl Into<String>) -> Self {
        Self {
            scheme: if secure { "https" } else { "http" },
            authority: authority.into(),
            user_agent: concat!("grpcore/", env!("CARGO_PKG_VERSION")).to_string(),
            accept_encoding: CompressionRegistry::default().accept_encoding(),
            send_encoding: None,
        }
    }

    /// Override the `user-agent` value.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Override the `grpc-accept-encoding` value.
    #[must_use]
    pub fn accept_encoding(mut self, accept_encoding: impl Into<String>) -> Self {
        self.accept_encoding = accept_encoding.into();
        self
    }

    /// Announce compressed requests with `grpc-encoding`.
    #[must_use]
    pub fn send_encoding(mut self, encoding: Option<String>) -> Self {
        self.send_encoding = encoding;
        self
    }

    /// The `:authority` value.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Build the header block for one call.
    ///
    /// Pseudo-headers come first, then the engine's own headers, then
    /// caller metadata in insertion order. Caller entries using a pseudo or
    /// reserved name are dropped.
    pub fn build(&self, path: &str, timeout: Option<Duration>, metadata: &Metadata) -> Metadata {
        let mut headers = Metadata::with_capacity(10 + metadata.len());
        headers.append(METHOD, "POST");
        headers.append(SCHEME, self.scheme);
        headers.append(PATH, path);
        headers.append(AUTHORITY, self.authority.as_str());
        if let Some(timeout) = timeout {
            headers.append(GRPC_TIMEOUT, encode_timeout(timeout));
        }
        headers.append(CONTENT_TYPE, APPLICATION_GRPC);
        headers.append(TE, TRAILERS);
        headers.append(GRPC_ACCEPT_ENCODING, self.accept_encoding.as_str());
        if let Some(encoding) = &self.send_encoding {
            headers.append(GRPC_ENCODING, encoding.as_str());
        }
        headers.append(USER_AGENT, self.user_agent.as_str());

        for (key, value) in metadata.iter() {
            if is_reserved(key) {
                debug!(key, "dropping reserved header from call metadata");
                continue;
            }
            headers.append(key, value);
        }
        headers
    }
}

/// Build a request header block with default encodings and user agent.
///
/// ```rust
/// use std::time::Duration;
/// use grpcore_client::create_call_headers;
/// use grpcore_core::Metadata;
///
/// let headers = create_call_headers(
///     false,
///     "localhost:50051",
///     "/helloworld.Greeter/SayHello",
///     Some(Duration::from_secs(1)),
///     &Metadata::new(),
/// );
/// assert_eq!(headers.get(":scheme"), Some("http"));
/// assert_eq!(headers.get("grpc-timeout"), Some("1000000u"));
/// ```
pub fn create_call_headers(
    secure: bool,
    authority: &str,
    path: &str,
    timeout: Option<Duration>,
    metadata: &Metadata,
) -> Metadata {
    HeaderTemplate::new(secure, authority).build(path, timeout, metadata)
}
