//! torgate Platform Abstraction Layer
//!
//! This crate provides platform-specific system proxy configuration.
//!
//! ## Supported Platforms
//!
//! - **Windows**: per-user WinINet settings (registry + refresh)
//! - **Others**: not managed; a warning tells the user to configure clients

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
pub use error::{PlatformError, Result};

#[cfg(windows)]
pub mod windows;

mod system_proxy;
#[cfg(windows)]
pub use system_proxy::WindowsSystemProxy;
pub use system_proxy::{default_system_proxy, proxy_server_value, validate_address, UnsupportedSystemProxy};
