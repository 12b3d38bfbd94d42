//! # torgate core
//!
//! Platform-independent core of torgate: a local HTTP forwarding proxy that
//! tunnels every request through an anonymity-network daemon's SOCKS5 port,
//! plus supervision of that daemon.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Forwarding proxy** - CONNECT tunnels and plain GET/POST relaying
//! - **Blocklist** - host patterns checked before any upstream connection
//! - **SOCKS connector** - outbound connections with remote name resolution
//! - **Daemon supervisor** - config generation, process lifecycle, bootstrap tracking
//! - **Control client** - identity rotation over the daemon's control port
//! - **Launcher** - start/stop coordination of all of the above
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use torgate_core::{Blocklist, Config, Launcher, NoSystemProxy, Settings};
//!
//! # async fn run() -> torgate_core::Result<()> {
//! let config = Config::load("torgate.toml")?;
//! let blocklist = Arc::new(Blocklist::with_patterns(["ads.example.com"]));
//! let launcher = Launcher::new(config, blocklist, Arc::new(NoSystemProxy));
//!
//! let ports = launcher.start(&Settings::default()).await?;
//! launcher.wait_ready().await?;
//! println!("proxy on 127.0.0.1:{}", ports.proxy);
//! launcher.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod blocklist;
pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod launcher;
pub mod ports;
pub mod proxy;
pub mod socks;
pub mod system_proxy;

// Re-exports for convenience
pub use blocklist::{BlockPolicy, Blocklist, MatchRule, ProtocolPath, RuleSet};
pub use config::{Config, Settings, SettingsStore, Theme};
pub use control::{ControlClient, RotationTask};
pub use daemon::{DaemonConfig, DaemonState, DaemonStatus, DaemonSupervisor, SupervisorOptions};
pub use error::{Error, Result};
pub use launcher::Launcher;
pub use ports::{PortAllocator, PortRequest, PortSet};
pub use proxy::{ProxyOptions, ProxyServer, RequestRecord};
pub use socks::{Connector, SocksConnector};
pub use system_proxy::{NoSystemProxy, SystemProxy};
