//! Server configuration management

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use grpcore_core::DEFAULT_MAX_MESSAGE_SIZE;

/// Default capacity of each call's request channel.
pub const DEFAULT_REQUEST_BUFFER: usize = 16;

/// Environment prefix for configuration overrides.
pub const ENV_PREFIX: &str = "GRPCORE";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Requests buffered per call before inbound reads are paused
    pub request_buffer: usize,
    /// Largest accepted request message, in bytes
    pub max_receive_message_size: usize,
    /// Largest response message the server will send, in bytes
    pub max_send_message_size: usize,
    /// Encoding used for responses when the client accepts it
    pub response_encoding: Option<String>,
    /// Responses smaller than this are sent uncompressed
    pub compression_min_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_buffer: DEFAULT_REQUEST_BUFFER,
            max_receive_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_send_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            response_encoding: None,
            compression_min_size: 0,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ServerConfig {
    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// The file format is auto-detected from the file extension.
    /// Environment variables with the `GRPCORE_` prefix override file
    /// settings, e.g. `GRPCORE_REQUEST_BUFFER=64`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use grpcore_server::ServerConfig;
    ///
    /// let config = ServerConfig::from_file("server.toml").expect("Failed to load config");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file doesn't exist
    /// - The file format is unsupported
    /// - The file contains invalid configuration
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    /// Load configuration from a file with custom environment prefix
    pub fn from_file_with_prefix(
        path: impl AsRef<Path>,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        use config::{Config, File, FileFormat};

        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        let config = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or(ConfigError::UnsupportedFormat)?,
                format,
            ))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_buffer == 0 {
            return Err(ConfigError::Invalid(
                "request_buffer must be at least 1".to_string(),
            ));
        }
        if self.max_receive_message_size == 0 || self.max_send_message_size == 0 {
            return Err(ConfigError::Invalid(
                "message size limits must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a configuration builder
    ///
    /// # Example
    ///
    /// ```rust
    /// use grpcore_server::ServerConfig;
    ///
    /// let config = ServerConfig::builder()
    ///     .request_buffer(4)
    ///     .response_encoding("gzip")
    ///     .build();
    /// assert_eq!(config.request_buffer, 4);
    /// ```
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new()
    }
}

/// Configuration builder
#[derive(Debug, Default)]
pub struct ConfigurationBuilder {
    config: ServerConfig,
}

impl ConfigurationBuilder {
    /// Create a new configuration builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-call request buffer (minimum 1)
    #[must_use]
    pub fn request_buffer(mut self, capacity: usize) -> Self {
        self.config.request_buffer = capacity.max(1);
        self
    }

    /// Set the maximum request message size
    #[must_use]
    pub const fn max_receive_message_size(mut self, size: usize) -> Self {
        self.config.max_receive_message_size = size;
        self
    }

    /// Set the maximum response message size
    #[must_use]
    pub const fn max_send_message_size(mut self, size: usize) -> Self {
        self.config.max_send_message_size = size;
        self
    }

    /// Compress responses with `encoding` when the client accepts it
    #[must_use]
    pub fn response_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.config.response_encoding = Some(encoding.into());
        self
    }

    /// Set the minimum response size for compression
    #[must_use]
    pub const fn compression_min_size(mut self, size: usize) -> Self {
        self.config.compression_min_size = size;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ServerConfig {
        self.config
    }
}
