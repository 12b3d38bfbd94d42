//! [`SystemProxy`] implementations

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use torgate_core::SystemProxy;
use tracing::warn;

use crate::error::{PlatformError, Result};

/// Registry `ProxyServer` value for the given state
pub fn proxy_server_value(enable: bool, address: &str) -> String {
    if enable {
        address.to_string()
    } else {
        String::new()
    }
}

/// Accept only `host:port` with a non-zero numeric port
pub fn validate_address(address: &str) -> Result<()> {
    let invalid = || PlatformError::InvalidAddress(address.to_string());
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(invalid());
    }
    match port.parse::<u16>() {
        Ok(p) if p != 0 => Ok(()),
        _ => Err(invalid()),
    }
}

/// Windows per-user proxy settings
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsSystemProxy;

#[cfg(windows)]
impl SystemProxy for WindowsSystemProxy {
    fn set_system_proxy(&self, enable: bool, address: &str) -> torgate_core::Result<()> {
        crate::windows::set_proxy(enable, address).map_err(Into::into)
    }
}

/// Fallback for platforms without system proxy support; warns once
#[derive(Debug, Default)]
pub struct UnsupportedSystemProxy {
    warned: AtomicBool,
}

impl SystemProxy for UnsupportedSystemProxy {
    fn set_system_proxy(&self, enable: bool, address: &str) -> torgate_core::Result<()> {
        validate_address(address).or_else(|e| if enable { Err(e) } else { Ok(()) })?;
        if !self.warned.swap(true, Ordering::Relaxed) {
            warn!(
                address,
                "System proxy is not managed on this platform; configure applications to use it manually"
            );
        }
        Ok(())
    }
}

/// System proxy implementation for the current platform
pub fn default_system_proxy() -> Arc<dyn SystemProxy> {
    #[cfg(windows)]
    {
        Arc::new(WindowsSystemProxy)
    }
    #[cfg(not(windows))]
    {
        Arc::new(UnsupportedSystemProxy::default())
    }
}
