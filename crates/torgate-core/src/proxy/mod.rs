//! Local HTTP forwarding proxy
//!
//! Accepts CONNECT and plain GET/POST requests, enforces the blocklist and
//! relays everything through the daemon's SOCKS5 port.

pub mod audit;
mod handler;
pub mod relay;
pub mod request;
mod server;

pub use audit::{Decision, RequestRecord};
pub use relay::{relay, RelayStats, RELAY_CHUNK_SIZE};
pub use request::{HttpTarget, RequestHead, DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_HEADER_SIZE};
pub use server::{ProxyOptions, ProxyServer};
