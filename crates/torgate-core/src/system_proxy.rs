//! Operating-system default proxy toggle
//!
//! The launcher only sees this trait; platform crates supply the real
//! implementation.

use tracing::debug;

use crate::error::Result;

/// Turns the OS-wide HTTP proxy setting on and off
pub trait SystemProxy: Send + Sync {
    /// Point the system proxy at `address` (`host:port`) or disable it
    fn set_system_proxy(&self, enable: bool, address: &str) -> Result<()>;
}

/// Leaves the system proxy untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSystemProxy;

impl SystemProxy for NoSystemProxy {
    fn set_system_proxy(&self, enable: bool, address: &str) -> Result<()> {
        debug!(enable, address, "System proxy management disabled");
        Ok(())
    }
}
