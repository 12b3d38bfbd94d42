//! Forwarding proxy listener
//!
//! One accept loop per running server and one task per accepted client.
//! Stopping closes the listener first so no new tunnel can start, then
//! optionally lets in-flight tunnels drain before aborting them.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::audit::RequestRecord;
use super::handler::{handle_connection, HandlerContext};
use super::request::{DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_HEADER_SIZE};
use crate::blocklist::Blocklist;
use crate::error::Result;
use crate::socks::{Connector, SocksConnector, DEFAULT_CONNECT_TIMEOUT};

const REQUEST_FEED_CAPACITY: usize = 256;

/// Tunables for [`ProxyServer`]
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Address the listener binds to
    pub listen_ip: IpAddr,
    /// Upper bound for request line plus headers
    pub max_header_size: usize,
    /// Largest POST body forwarded; bigger requests are answered with 502
    pub max_body_size: u64,
    /// How long `stop()` lets in-flight tunnels finish before aborting them
    pub drain_timeout: Duration,
    /// SOCKS connect + handshake timeout
    pub connect_timeout: Duration,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            drain_timeout: Duration::ZERO,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

struct Running {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// HTTP forwarding proxy that tunnels everything through SOCKS5
pub struct ProxyServer {
    blocklist: Arc<Blocklist>,
    options: ProxyOptions,
    feed: broadcast::Sender<RequestRecord>,
    running: Mutex<Option<Running>>,
}

impl ProxyServer {
    /// Create a stopped server enforcing `blocklist`
    pub fn new(blocklist: Arc<Blocklist>) -> Self {
        Self::with_options(blocklist, ProxyOptions::default())
    }

    /// Create a stopped server with explicit options
    pub fn with_options(blocklist: Arc<Blocklist>, options: ProxyOptions) -> Self {
        let (feed, _) = broadcast::channel(REQUEST_FEED_CAPACITY);
        Self {
            blocklist,
            options,
            feed,
            running: Mutex::new(None),
        }
    }

    /// Blocklist consulted for every request
    pub fn blocklist(&self) -> &Arc<Blocklist> {
        &self.blocklist
    }

    /// Subscribe to the log of handled requests
    pub fn subscribe(&self) -> broadcast::Receiver<RequestRecord> {
        self.feed.subscribe()
    }

    /// Whether the listener is up
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Bound listener address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    /// Listen on `listen_port` and tunnel through the SOCKS port
    /// `upstream_socks_port` on localhost
    ///
    /// Returns the bound address. A second call while running is a no-op
    /// that returns the existing address.
    pub async fn start(&self, listen_port: u16, upstream_socks_port: u16) -> Result<SocketAddr> {
        let connector = SocksConnector::localhost(upstream_socks_port)
            .with_timeout(self.options.connect_timeout);
        let addr = SocketAddr::new(self.options.listen_ip, listen_port);
        self.start_with(addr, Arc::new(connector)).await
    }

    /// Listen on `addr` using an arbitrary upstream connector
    pub async fn start_with(
        &self,
        addr: SocketAddr,
        connector: Arc<dyn Connector>,
    ) -> Result<SocketAddr> {
        if let Some(existing) = self.local_addr() {
            debug!(addr = %existing, "Proxy already running");
            return Ok(existing);
        }

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let ctx = Arc::new(HandlerContext {
            blocklist: Arc::clone(&self.blocklist),
            connector,
            feed: self.feed.clone(),
            max_header_size: self.options.max_header_size,
            max_body_size: self.options.max_body_size,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let drain_timeout = self.options.drain_timeout;

        let mut running = self.running.lock();
        if let Some(existing) = running.as_ref() {
            // lost a race with a concurrent start; our listener drops here
            return Ok(existing.local_addr);
        }
        let task = tokio::spawn(accept_loop(listener, ctx, shutdown_rx, drain_timeout));
        *running = Some(Running {
            local_addr,
            shutdown_tx,
            task,
        });

        info!(addr = %local_addr, "Proxy listening");
        Ok(local_addr)
    }

    /// Stop accepting and tear down in-flight tunnels
    ///
    /// Returns once the listener is closed and every connection task has
    /// finished or been aborted. Calling it on a stopped server does nothing.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.task.await {
            warn!(error = %e, "Proxy accept loop ended abnormally");
        }
        info!(addr = %running.local_addr, "Proxy stopped");
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<HandlerContext>,
    mut shutdown_rx: watch::Receiver<bool>,
    drain_timeout: Duration,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let ctx = Arc::clone(&ctx);
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, &ctx).await {
                                debug!(peer = %peer, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                }
            }
            // reap finished tasks so the set does not grow without bound
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    // no new tunnels from here on
    drop(listener);

    if !connections.is_empty() && !drain_timeout.is_zero() {
        debug!(active = connections.len(), ?drain_timeout, "Draining tunnels");
        let drained = tokio::time::timeout(drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_ok() {
            return;
        }
    }

    if !connections.is_empty() {
        debug!(active = connections.len(), "Aborting in-flight tunnels");
    }
    connections.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn test_start_twice_keeps_one_listener() {
        let server = ProxyServer::new(Arc::new(Blocklist::new()));
        let connector = Arc::new(SocksConnector::localhost(9));

        let first = server.start_with(loopback(), connector.clone()).await.unwrap();
        let second = server.start_with(loopback(), connector).await.unwrap();
        assert_eq!(first, second);
        assert!(server.is_running());

        server.stop().await;
        assert!(!server.is_running());
        assert!(TcpStream::connect(first).await.is_err());
    }

    #[tokio::test]
    async fn test_unsupported_method_is_501() {
        let server = ProxyServer::new(Arc::new(Blocklist::new()));
        let addr = server
            .start_with(loopback(), Arc::new(SocksConnector::localhost(9)))
            .await
            .unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"DELETE http://a.com/ HTTP/1.1\r\nHost: a.com\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 501"), "{response}");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_request_is_502() {
        let server = ProxyServer::new(Arc::new(Blocklist::new()));
        let addr = server
            .start_with(loopback(), Arc::new(SocksConnector::localhost(9)))
            .await
            .unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"garbage\r\n\r\n").await.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 502"), "{response}");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_on_stopped_server_is_noop() {
        let server = ProxyServer::new(Arc::new(Blocklist::new()));
        server.stop().await;
        assert_eq!(server.local_addr(), None);
    }
}
