//! Control-port client for identity rotation
//!
//! Speaks just enough of the daemon's line-based control protocol to
//! authenticate and send `SIGNAL NEWNYM`. Replies are `<code><sep><text>`
//! lines where `-` or `+` continue a multi-line reply and a space ends it.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Per-operation I/O timeout
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between automatic rotations
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(30);

/// Client for one daemon control port
#[derive(Debug, Clone)]
pub struct ControlClient {
    addr: SocketAddr,
    password: Option<String>,
    timeout: Duration,
}

impl ControlClient {
    /// Client for `127.0.0.1:<port>` using null authentication
    pub fn localhost(port: u16) -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    /// Client for an explicit address
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            password: None,
            timeout: CONTROL_TIMEOUT,
        }
    }

    /// Authenticate with a control-port password
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    /// Override the I/O timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Control port address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Open a session, authenticate, request a new identity and close
    pub async fn rotate_identity(&self) -> Result<()> {
        tokio::time::timeout(self.timeout, self.rotate_inner())
            .await
            .map_err(|_| Error::ControlAuth(format!("control port {} timed out", self.addr)))?
    }

    async fn rotate_inner(&self) -> Result<()> {
        let stream = TcpStream::connect(self.addr).await.map_err(|e| {
            Error::ControlAuth(format!("control port {} unreachable: {e}", self.addr))
        })?;
        let mut session = BufReader::new(stream);

        let auth = match &self.password {
            Some(pw) => format!("AUTHENTICATE {}\r\n", quote(pw)),
            None => "AUTHENTICATE\r\n".to_string(),
        };
        command(&mut session, &auth, "authentication").await?;
        command(&mut session, "SIGNAL NEWNYM\r\n", "SIGNAL NEWNYM").await?;

        // the daemon closes on QUIT; its reply does not matter
        let _ = session.write_all(b"QUIT\r\n").await;
        debug!(addr = %self.addr, "Identity rotated");
        Ok(())
    }
}

/// Rotate once through `client`, logging instead of failing
pub async fn rotate_best_effort(client: &ControlClient) -> bool {
    match client.rotate_identity().await {
        Ok(()) => {
            info!(addr = %client.addr(), "New identity requested");
            true
        }
        Err(e) => {
            warn!(error = %e, "Identity rotation failed");
            false
        }
    }
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

async fn command<S>(session: &mut S, line: &str, what: &str) -> Result<()>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    session.write_all(line.as_bytes()).await?;
    session.flush().await?;

    let (code, text) = read_reply(session).await?;
    if code != 250 {
        return Err(Error::ControlAuth(format!("{what} rejected: {code} {text}")));
    }
    Ok(())
}

/// Read one (possibly multi-line) reply; returns the status code and the
/// text of its final line
async fn read_reply<R>(reader: &mut R) -> Result<(u16, String)>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(Error::ControlAuth("control connection closed".into()));
        }
        let trimmed = line.trim_end();
        if trimmed.len() < 4 || !trimmed.is_char_boundary(3) {
            return Err(Error::ControlAuth(format!("malformed reply: {trimmed:?}")));
        }
        let code: u16 = trimmed[..3]
            .parse()
            .map_err(|_| Error::ControlAuth(format!("malformed reply: {trimmed:?}")))?;
        if trimmed.as_bytes()[3] == b' ' {
            return Ok((code, trimmed[4..].to_string()));
        }
    }
}

/// Periodic identity rotation on its own task
///
/// Failures are logged and never stop the timer. Dropping the task or
/// calling [`RotationTask::stop`] cancels it.
pub struct RotationTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RotationTask {
    /// Start rotating every `interval`; the first rotation happens after one
    /// full interval
    pub fn spawn(client: ControlClient, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "Identity rotation enabled");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        rotate_best_effort(&client).await;
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("Identity rotation stopped");
        });
        Self { stop_tx, handle }
    }

    /// Whether the timer task is still alive
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel and wait for the task
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        let _ = (&mut self.handle).await;
    }
}

impl Drop for RotationTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
