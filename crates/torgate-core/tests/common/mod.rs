//! Shared fakes for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use torgate_core::socks::BoxedStream;
use torgate_core::{Connector, Error, Result};

/// What the fake SOCKS server does once a tunnel is up
#[derive(Clone, Copy)]
pub enum Behavior {
    /// Echo every byte back
    Echo,
    /// Read one HTTP request, answer with the given bytes and close
    Respond(&'static [u8]),
}

/// In-process SOCKS5 server that is also the destination
pub struct FakeSocks {
    pub addr: SocketAddr,
    /// Requested `(host, port)` per tunnel
    pub requests: Arc<Mutex<Vec<(String, u16)>>>,
    /// Raw bytes of each HTTP request received in `Respond` mode
    pub received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FakeSocks {
    pub fn requests(&self) -> Vec<(String, u16)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }
}

pub async fn spawn_fake_socks(behavior: Behavior) -> FakeSocks {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let received = Arc::new(Mutex::new(Vec::new()));

    let (req, rec) = (Arc::clone(&requests), Arc::clone(&received));
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let (req, rec) = (Arc::clone(&req), Arc::clone(&rec));
            tokio::spawn(async move {
                let _ = serve_socks(stream, behavior, req, rec).await;
            });
        }
    });

    FakeSocks {
        addr,
        requests,
        received,
    }
}

async fn serve_socks(
    mut s: TcpStream,
    behavior: Behavior,
    requests: Arc<Mutex<Vec<(String, u16)>>>,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
) -> std::io::Result<()> {
    let mut head = [0u8; 2];
    s.read_exact(&mut head).await?;
    let mut methods = vec![0u8; head[1] as usize];
    s.read_exact(&mut methods).await?;
    s.write_all(&[5, 0]).await?;

    let mut req = [0u8; 4];
    s.read_exact(&mut req).await?;
    let host = match req[3] {
        3 => {
            let mut len = [0u8; 1];
            s.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            s.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        1 => {
            let mut ip = [0u8; 4];
            s.read_exact(&mut ip).await?;
            std::net::Ipv4Addr::from(ip).to_string()
        }
        _ => {
            let mut ip = [0u8; 16];
            s.read_exact(&mut ip).await?;
            std::net::Ipv6Addr::from(ip).to_string()
        }
    };
    let mut port = [0u8; 2];
    s.read_exact(&mut port).await?;
    requests
        .lock()
        .unwrap()
        .push((host, u16::from_be_bytes(port)));
    s.write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0, 0]).await?;

    match behavior {
        Behavior::Echo => {
            let (mut r, mut w) = s.split();
            tokio::io::copy(&mut r, &mut w).await?;
        }
        Behavior::Respond(response) => {
            let mut reader = BufReader::new(&mut s);
            let mut raw = Vec::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await? == 0 {
                    break;
                }
                raw.extend_from_slice(line.as_bytes());
                if let Some(v) = line
                    .to_ascii_lowercase()
                    .strip_prefix("content-length:")
                {
                    content_length = v.trim().parse().unwrap_or(0);
                }
                if line == "\r\n" {
                    break;
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).await?;
            raw.extend_from_slice(&body);
            received.lock().unwrap().push(raw);

            s.write_all(response).await?;
            s.shutdown().await?;
        }
    }
    Ok(())
}

/// Connector that only counts attempts and always fails
#[derive(Default)]
pub struct CountingConnector {
    pub attempts: AtomicUsize,
}

impl CountingConnector {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for CountingConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::connector(host, port, "counting connector never connects"))
    }
}

/// Read an HTTP response head (up to the blank line)
pub async fn read_response_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.unwrap() == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Write an executable-free fake daemon script; run it through `/bin/sh`
pub fn write_daemon_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-tor.sh");
    std::fs::write(&path, body).unwrap();
    path
}

/// Script that records its arguments, reports bootstrap and keeps running
pub const BOOTSTRAPPING_DAEMON: &str = r#"echo "$@" > args.txt
echo "Jan 01 00:00:00.000 [notice] Tor can't help you if you use it wrong!"
echo "Jan 01 00:00:00.100 [notice] Bootstrapped 5% (conn): Connecting to a relay"
sleep 0.3
echo "Jan 01 00:00:00.200 [notice] Bootstrapped 50% (loading_descriptors): Loading relay descriptors"
echo "warning on stderr" >&2
sleep 0.3
echo "Jan 01 00:00:00.300 [notice] Bootstrapped 100% (done): Done"
exec sleep 30
"#;

/// Script that starts bootstrapping and then dies
pub const CRASHING_DAEMON: &str = r#"echo "[notice] Bootstrapped 10% (conn_done): Connected to a relay"
sleep 0.2
echo "[err] Reading config failed" >&2
exit 3
"#;
