//! SOCKS5 upstream connector
//!
//! Opens outbound connections through the daemon's local SOCKS5 port.
//! Destination names are always sent to the SOCKS server unresolved, so
//! DNS happens on the far side of the tunnel and never locally.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

use crate::error::{Error, Result};

/// Default timeout for the SOCKS connect + handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Combined trait for async read + write
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// Upstream stream handed back by a [`Connector`]
pub type BoxedStream = Box<dyn AsyncReadWrite + Unpin + Send>;

/// Opens upstream connections for the proxy
///
/// The proxy only ever talks to this trait, so tests can count or refuse
/// connection attempts without a real SOCKS server.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `host:port`
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream>;
}

/// Connector that tunnels through a local SOCKS5 endpoint
#[derive(Debug, Clone)]
pub struct SocksConnector {
    socks_addr: SocketAddr,
    timeout: Duration,
}

impl SocksConnector {
    /// Create a connector for the SOCKS endpoint at `socks_addr`
    pub fn new(socks_addr: SocketAddr) -> Self {
        Self {
            socks_addr,
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Connector for `127.0.0.1:<port>`
    pub fn localhost(port: u16) -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    /// Override the connect timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// SOCKS endpoint address
    pub fn socks_addr(&self) -> SocketAddr {
        self.socks_addr
    }
}

#[async_trait]
impl Connector for SocksConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream> {
        let stream = connect_via_socks(host, port, self.socks_addr, self.timeout).await?;
        Ok(Box::new(stream))
    }
}

/// Open `dest_host:dest_port` through the SOCKS5 server at `socks_addr`
///
/// Fails with [`Error::Connector`] when the SOCKS endpoint refuses the TCP
/// connection (typically: daemon not bootstrapped yet), the handshake fails,
/// or the timeout elapses.
pub async fn connect_via_socks(
    dest_host: &str,
    dest_port: u16,
    socks_addr: SocketAddr,
    timeout: Duration,
) -> Result<Socks5Stream<tokio::net::TcpStream>> {
    // IPv6 literals arrive bracketed from request targets
    let host = dest_host.trim_start_matches('[').trim_end_matches(']');
    debug!(host, port = dest_port, socks = %socks_addr, "Opening SOCKS5 tunnel");

    match tokio::time::timeout(timeout, Socks5Stream::connect(socks_addr, (host, dest_port))).await
    {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(Error::connector(host, dest_port, e)),
        Err(_) => Err(Error::connector(host, dest_port, "SOCKS connect timed out")),
    }
}
