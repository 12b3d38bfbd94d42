//! Free TCP port allocation
//!
//! Ports are found by binding `127.0.0.1:0` and reading back the port the
//! OS picked. All scratch sockets of one [`PortAllocator::allocate_set`] call
//! stay open until the whole set is assigned, so a set never contains the
//! same port twice.

use std::net::{Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::{Error, Result};

/// Ports used by one proxy + daemon session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSet {
    /// Local forwarding proxy listener
    pub proxy: u16,
    /// Daemon SOCKS port
    pub socks: u16,
    /// Daemon control port
    pub control: u16,
    /// Daemon DNS port
    pub dns: u16,
}

/// Requested ports; `0` means "pick a free one"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortRequest {
    /// Proxy listener port
    pub proxy: u16,
    /// SOCKS port
    pub socks: u16,
    /// Control port
    pub control: u16,
    /// DNS port
    pub dns: u16,
}

/// Hands out free ephemeral ports on the loopback interface
#[derive(Debug, Default, Clone, Copy)]
pub struct PortAllocator;

impl PortAllocator {
    /// Create an allocator
    pub fn new() -> Self {
        Self
    }

    /// Allocate a single free port
    pub fn allocate(&self) -> Result<u16> {
        let (_socket, port) = bind_ephemeral()?;
        Ok(port)
    }

    /// Allocate every `0` entry of `request` with distinct free ports
    pub fn allocate_set(&self, request: PortRequest) -> Result<PortSet> {
        let mut held = Vec::new();
        let mut taken: Vec<u16> = [request.proxy, request.socks, request.control, request.dns]
            .into_iter()
            .filter(|p| *p != 0)
            .collect();

        let mut pick = |fixed: u16| -> Result<u16> {
            if fixed != 0 {
                return Ok(fixed);
            }
            loop {
                let (socket, port) = bind_ephemeral()?;
                held.push(socket);
                if !taken.contains(&port) {
                    taken.push(port);
                    return Ok(port);
                }
            }
        };

        let set = PortSet {
            proxy: pick(request.proxy)?,
            socks: pick(request.socks)?,
            control: pick(request.control)?,
            dns: pick(request.dns)?,
        };
        debug!(?set, "Allocated ports");
        Ok(set)
    }
}

fn bind_ephemeral() -> Result<(Socket, u16)> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| Error::PortAllocation(e.to_string()))?;
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    socket
        .bind(&addr.into())
        .map_err(|e| Error::PortAllocation(e.to_string()))?;

    let port = socket
        .local_addr()
        .ok()
        .and_then(|a| a.as_socket())
        .map(|a| a.port())
        .ok_or_else(|| Error::PortAllocation("bound socket has no port".into()))?;

    Ok((socket, port))
}
