//! Channel and TLS configuration types.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// TLS protocol version specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TlsVersion {
    /// TLS 1.2 or newer.
    Tls12,
    /// TLS 1.3 only.
    #[default]
    Tls13,
}

/// TLS configuration for secure channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Minimum TLS protocol version to accept.
    pub min_version: TlsVersion,

    /// Whether to validate server certificates.
    pub validate_certificates: bool,

    /// CA certificates to trust (DER format).
    pub custom_ca_certs: Vec<Vec<u8>>,

    /// Server name to verify against, when it differs from the dialed host.
    pub server_name: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            min_version: TlsVersion::default(),
            validate_certificates: true,
            custom_ca_certs: Vec::new(),
            server_name: None,
        }
    }
}

impl TlsConfig {
    /// Trust the given DER-encoded CA certificates.
    #[must_use]
    pub fn with_ca_certs(certs: Vec<Vec<u8>>) -> Self {
        Self {
            custom_ca_certs: certs,
            ..Self::default()
        }
    }

    /// Create an insecure TLS configuration that skips certificate validation.
    ///
    /// **Warning**: This configuration is insecure and should ONLY be used in testing.
    #[must_use]
    pub fn insecure() -> Self {
        Self {
            validate_certificates: false,
            ..Self::default()
        }
    }

    /// Check if this configuration is insecure (skips certificate validation).
    #[must_use]
    pub const fn is_insecure(&self) -> bool {
        !self.validate_certificates
    }
}

/// Extra certificate check run after chain validation, keyed by authority.
///
/// Receives the authority being dialed and the DER bytes of the end-entity
/// certificate; an `Err` aborts the handshake with the given reason.
pub type CertificateCheck = Arc<dyn Fn(&str, &[u8]) -> Result<(), String> + Send + Sync>;

/// Channel credentials.
#[derive(Clone, Default)]
pub enum Credentials {
    /// Plaintext HTTP/2 (`:scheme=http`).
    #[default]
    Insecure,
    /// HTTP/2 over TLS (`:scheme=https`).
    Secure {
        /// TLS parameters.
        tls: TlsConfig,
        /// Optional per-authority certificate check.
        check: Option<CertificateCheck>,
    },
}

impl Credentials {
    /// Secure credentials with the given TLS configuration.
    pub fn secure(tls: TlsConfig) -> Self {
        Self::Secure { tls, check: None }
    }

    /// Secure credentials with an additional certificate check.
    pub fn secure_with_check(tls: TlsConfig, check: CertificateCheck) -> Self {
        Self::Secure {
            tls,
            check: Some(check),
        }
    }

    /// Returns `true` for TLS credentials.
    pub const fn is_secure(&self) -> bool {
        matches!(self, Self::Secure { .. })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insecure => f.write_str("Insecure"),
            Self::Secure { tls, check } => f
                .debug_struct("Secure")
                .field("tls", tls)
                .field("check", &check.as_ref().map(|_| "<fn>"))
                .finish(),
        }
    }
}

/// Immutable channel options supplied when a client is constructed.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Channel credentials.
    pub credentials: Credentials,
    /// `:authority` override; defaults to the dialed `host:port`.
    pub authority: Option<String>,
    /// Client identifier sent as `user-agent`.
    pub user_agent: String,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Encoding used to compress outbound messages, if any.
    pub send_encoding: Option<String>,
    /// Messages smaller than this are never compressed.
    pub compress_min_size: usize,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            credentials: Credentials::Insecure,
            authority: None,
            user_agent: concat!("grpcore/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Duration::from_secs(10),
            send_encoding: None,
            compress_min_size: 0,
            max_message_size: 4 * 1024 * 1024,
        }
    }
}

impl ChannelOptions {
    /// Set the channel credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Override the `:authority` header.
    #[must_use]
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Compress outbound messages with the named encoding.
    #[must_use]
    pub fn send_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.send_encoding = Some(encoding.into());
        self
    }

    /// Set the maximum inbound message size.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}
