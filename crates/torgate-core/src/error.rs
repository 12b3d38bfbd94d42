//! Error types for torgate-core
//!
//! Centralized error handling using `thiserror`. Per-connection errors
//! (`Blocked`, `Connector`, `Protocol`) never leave the connection task that
//! produced them; they are turned into an HTTP status by [`Error::status_code`].

use thiserror::Error;

/// Main error type for torgate-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Host matched the blocklist
    #[error("Forbidden: host '{host}' is blocked")]
    Blocked {
        /// Host that was requested
        host: String,
    },

    /// SOCKS handshake or upstream connect failed
    #[error("Upstream connection to {host}:{port} failed: {reason}")]
    Connector {
        /// Destination host
        host: String,
        /// Destination port
        port: u16,
        /// Failure reason
        reason: String,
    },

    /// Malformed request line or headers
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Request method is not handled by the proxy
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    /// Daemon failed to spawn or exited unexpectedly
    #[error("Daemon process error: {0}")]
    Process(String),

    /// Control port rejected authentication or a command
    #[error("Control channel error: {0}")]
    ControlAuth(String),

    /// Bridge line uses a transport we do not know how to launch
    #[error("Unsupported pluggable transport '{0}' (supported: obfs4, meek_lite, webtunnel, snowflake)")]
    UnsupportedTransport(String),

    /// Bridge configuration is unusable
    #[error("Bridge configuration error: {0}")]
    Bridge(String),

    /// Operating-system proxy settings could not be changed
    #[error("System proxy error: {0}")]
    SystemProxy(String),

    /// No free port could be allocated
    #[error("Port allocation failed: {0}")]
    PortAllocation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// Path to the missing config file
        path: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    ConfigValue {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (settings and blocklist files)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a connector error
    pub fn connector(host: impl Into<String>, port: u16, reason: impl ToString) -> Self {
        Self::Connector {
            host: host.into(),
            port,
            reason: reason.to_string(),
        }
    }

    /// Create a config value error
    pub fn config_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// HTTP status the proxy answers with when a request fails with this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Blocked { .. } => 403,
            Error::UnsupportedMethod(_) => 501,
            _ => 502,
        }
    }
}
