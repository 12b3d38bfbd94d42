//! Anonymity-network daemon supervision
//!
//! - [`torrc`]: configuration text generation and parsing
//! - [`bridge`]: bridge line parsing
//! - [`bootstrap`]: progress extraction from the daemon's log output
//! - [`DaemonSupervisor`]: spawns, watches and stops the daemon process

pub mod bootstrap;
pub mod bridge;
mod supervisor;
pub mod torrc;

use std::fmt;

pub use bootstrap::{parse_progress, ProgressTracker, BOOTSTRAP_MARKER};
pub use bridge::{parse_bridges, BridgeSet, TransportType};
pub use supervisor::{DaemonSupervisor, SupervisorOptions, LOG_FILE_NAME, TORRC_FILE_NAME};
pub use torrc::{build_config, parse_directives, BridgeConfig, DaemonConfig, Directives};

/// Lifecycle state of the supervised daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DaemonState {
    /// No process
    #[default]
    Stopped,
    /// Writing config and spawning
    Starting,
    /// Process running, circuits being built (percent)
    Bootstrapping(u8),
    /// Bootstrap reached 100%
    Ready,
    /// Terminating the process
    Stopping,
}

impl DaemonState {
    /// Bootstrap progress implied by this state
    pub fn progress(&self) -> u8 {
        match self {
            DaemonState::Bootstrapping(p) => *p,
            DaemonState::Ready => 100,
            _ => 0,
        }
    }

    /// Whether a process exists or is about to
    pub fn is_active(&self) -> bool {
        !matches!(self, DaemonState::Stopped)
    }
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonState::Stopped => write!(f, "stopped"),
            DaemonState::Starting => write!(f, "starting"),
            DaemonState::Bootstrapping(p) => write!(f, "bootstrapping ({p}%)"),
            DaemonState::Ready => write!(f, "ready"),
            DaemonState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Snapshot published to observers of the supervisor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonStatus {
    /// Current state
    pub state: DaemonState,
    /// Why the daemon last stopped on its own, if it did
    pub last_error: Option<String>,
}

impl DaemonStatus {
    fn with_state(state: DaemonState) -> Self {
        Self {
            state,
            last_error: None,
        }
    }
}
