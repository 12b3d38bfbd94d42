//! Platform-specific errors

use thiserror::Error;

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Proxy address is not `host:port`
    #[error("Invalid proxy address '{0}': expected host:port")]
    InvalidAddress(String),

    /// Registry operation failed
    #[error("Registry error on '{key}': system error {code}")]
    Registry {
        /// Key or value name
        key: String,
        /// Win32 error code
        code: u32,
    },

    /// WinINet refused to reload its settings
    #[error("WinINet option {option} could not be applied")]
    WinInet {
        /// Option id
        option: u32,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Platform result type
pub type Result<T> = std::result::Result<T, PlatformError>;

impl From<PlatformError> for torgate_core::Error {
    fn from(err: PlatformError) -> Self {
        torgate_core::Error::SystemProxy(err.to_string())
    }
}
