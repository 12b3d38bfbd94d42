//! Daemon process supervisor

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::bootstrap::ProgressTracker;
use super::torrc::DaemonConfig;
use super::{DaemonState, DaemonStatus};
use crate::error::{Error, Result};

/// Generated configuration file, inside the work directory
pub const TORRC_FILE_NAME: &str = "torrc";

/// Verbatim daemon output, inside the work directory
pub const LOG_FILE_NAME: &str = "tor.log";

/// How long trailing output is collected after the process is gone
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Where and how to launch the daemon
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Daemon executable
    pub binary: PathBuf,
    /// Extra arguments placed before `-f <torrc>`
    pub args: Vec<OsString>,
    /// Directory for the generated config and the log artifact
    pub work_dir: PathBuf,
}

impl SupervisorOptions {
    /// Launch `binary` with scratch files under `work_dir`
    pub fn new(binary: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            work_dir: work_dir.into(),
        }
    }

    /// Add arguments placed before `-f <torrc>`
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

struct RunningDaemon {
    stop_tx: oneshot::Sender<()>,
    watcher: JoinHandle<()>,
    pid: Option<u32>,
}

/// Runs at most one daemon process and tracks its bootstrap
pub struct DaemonSupervisor {
    options: SupervisorOptions,
    status_tx: Arc<watch::Sender<DaemonStatus>>,
    running: Mutex<Option<RunningDaemon>>,
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

impl DaemonSupervisor {
    /// Create a stopped supervisor
    pub fn new(options: SupervisorOptions) -> Self {
        let (status_tx, _) = watch::channel(DaemonStatus::default());
        Self {
            options,
            status_tx: Arc::new(status_tx),
            running: Mutex::new(None),
        }
    }

    /// Path of the generated configuration file
    pub fn torrc_path(&self) -> PathBuf {
        self.options.work_dir.join(TORRC_FILE_NAME)
    }

    /// Path of the daemon log artifact
    pub fn log_path(&self) -> PathBuf {
        self.options.work_dir.join(LOG_FILE_NAME)
    }

    /// Current status snapshot
    pub fn status(&self) -> DaemonStatus {
        self.status_tx.borrow().clone()
    }

    /// Current state
    pub fn state(&self) -> DaemonState {
        self.status_tx.borrow().state
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<DaemonStatus> {
        self.status_tx.subscribe()
    }

    /// Process id of the running daemon
    pub async fn pid(&self) -> Option<u32> {
        self.running.lock().await.as_ref().and_then(|r| r.pid)
    }

    /// Write the config and spawn the daemon
    ///
    /// Returns as soon as the process is spawned; observe [`subscribe`] or
    /// call [`wait_ready`] for bootstrap. Calling it while a daemon is
    /// running does nothing.
    ///
    /// [`subscribe`]: Self::subscribe
    /// [`wait_ready`]: Self::wait_ready
    pub async fn start(&self, config: &DaemonConfig) -> Result<()> {
        let mut running = self.running.lock().await;

        if let Some(current) = running.as_ref() {
            if !current.watcher.is_finished() {
                debug!("Daemon already running");
                return Ok(());
            }
            // exited on its own; the watcher already reported it
            *running = None;
        }

        config.validate()?;
        self.status_tx
            .send_replace(DaemonStatus::with_state(DaemonState::Starting));

        match self.spawn(config).await {
            Ok(daemon) => {
                info!(pid = ?daemon.pid, binary = %self.options.binary.display(), "Daemon started");
                *running = Some(daemon);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to start daemon");
                remove_scratch(&self.torrc_path()).await;
                self.status_tx.send_replace(DaemonStatus {
                    state: DaemonState::Stopped,
                    last_error: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    async fn spawn(&self, config: &DaemonConfig) -> Result<RunningDaemon> {
        tokio::fs::create_dir_all(&self.options.work_dir).await?;

        let torrc = self.torrc_path();
        tokio::fs::write(&torrc, config.to_torrc()).await?;
        debug!(path = %torrc.display(), "Wrote daemon config");

        let log = match File::create(self.log_path()).await {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(path = %self.log_path().display(), error = %e, "Daemon log artifact unavailable");
                None
            }
        };

        let mut cmd = Command::new(&self.options.binary);
        cmd.args(&self.options.args)
            .arg("-f")
            .arg(&torrc)
            .current_dir(&self.options.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::Process(format!(
                "failed to spawn {}: {e}",
                self.options.binary.display()
            ))
        })?;
        let pid = child.id();

        let (line_tx, line_rx) = mpsc::channel(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, OutputStream::Stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, OutputStream::Stderr, line_tx));
        }

        // published before the watcher can report any progress
        self.status_tx
            .send_replace(DaemonStatus::with_state(DaemonState::Bootstrapping(0)));

        let (stop_tx, stop_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch_daemon(
            child,
            line_rx,
            log,
            Arc::clone(&self.status_tx),
            stop_rx,
            torrc,
        ));

        Ok(RunningDaemon {
            stop_tx,
            watcher,
            pid,
        })
    }

    /// Terminate the daemon and remove the scratch config
    ///
    /// Returns once the process has exited. Does nothing when stopped.
    pub async fn stop(&self) {
        let Some(daemon) = self.running.lock().await.take() else {
            return;
        };

        let died_on_its_own = daemon.watcher.is_finished();
        if !died_on_its_own {
            info!(pid = ?daemon.pid, "Stopping daemon");
            self.status_tx.send_modify(|s| s.state = DaemonState::Stopping);
        }

        let _ = daemon.stop_tx.send(());
        if let Err(e) = daemon.watcher.await {
            warn!(error = %e, "Daemon watcher ended abnormally");
        }
        remove_scratch(&self.torrc_path()).await;

        self.status_tx.send_modify(|s| {
            s.state = DaemonState::Stopped;
            if !died_on_its_own {
                s.last_error = None;
            }
        });
        info!("Daemon stopped");
    }

    /// Stop, then start with a fresh config
    pub async fn restart(&self, config: &DaemonConfig) -> Result<()> {
        self.stop().await;
        self.start(config).await
    }

    /// Wait until bootstrap completes
    ///
    /// Fails if the daemon stops first or `timeout` elapses.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| matches!(s.state, DaemonState::Ready | DaemonState::Stopped)),
        )
        .await;

        match waited {
            Ok(Ok(status)) if status.state == DaemonState::Ready => Ok(()),
            Ok(Ok(status)) => Err(Error::Process(
                status
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "daemon is not running".into()),
            )),
            Ok(Err(_)) => Err(Error::Process("supervisor dropped".into())),
            Err(_) => Err(Error::Process(format!(
                "bootstrap did not complete within {}s",
                timeout.as_secs()
            ))),
        }
    }
}

impl Drop for DaemonSupervisor {
    fn drop(&mut self) {
        // the watcher kills the child once the stop sender is gone
        if self.running.get_mut().take().is_some() {
            let _ = std::fs::remove_file(self.torrc_path());
        }
    }
}

async fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<(OutputStream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if tx.send((stream, line)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(?stream, error = %e, "Daemon output closed");
                break;
            }
        }
    }
}

struct OutputSink {
    log: Option<File>,
    progress: ProgressTracker,
    status_tx: Arc<watch::Sender<DaemonStatus>>,
}

impl OutputSink {
    async fn handle(&mut self, stream: OutputStream, line: String) {
        if let Some(log) = self.log.as_mut() {
            let written = async {
                log.write_all(line.as_bytes()).await?;
                log.write_all(b"\n").await?;
                log.flush().await
            }
            .await;
            if let Err(e) = written {
                warn!(error = %e, "Writing daemon log failed; disabling log artifact");
                self.log = None;
            }
        }

        match stream {
            OutputStream::Stdout => debug!(target: "torgate::daemon", "{line}"),
            OutputStream::Stderr => warn!(target: "torgate::daemon", "{line}"),
        }

        if let Some(progress) = self.progress.observe(&line) {
            let state = if progress >= 100 {
                DaemonState::Ready
            } else {
                DaemonState::Bootstrapping(progress)
            };
            info!(progress, "Daemon bootstrap progress");
            self.status_tx.send_modify(|s| {
                // a concurrent stop() owns the state from here on
                if matches!(s.state, DaemonState::Bootstrapping(_)) {
                    s.state = state;
                }
            });
        }
    }

    async fn drain(&mut self, lines: &mut mpsc::Receiver<(OutputStream, String)>) {
        while let Ok(Some((stream, line))) =
            tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, lines.recv()).await
        {
            self.handle(stream, line).await;
        }
    }
}

async fn watch_daemon(
    mut child: Child,
    mut lines: mpsc::Receiver<(OutputStream, String)>,
    log: Option<File>,
    status_tx: Arc<watch::Sender<DaemonStatus>>,
    mut stop_rx: oneshot::Receiver<()>,
    torrc: PathBuf,
) {
    let mut sink = OutputSink {
        log,
        progress: ProgressTracker::new(),
        status_tx,
    };

    let exit = loop {
        tokio::select! {
            _ = &mut stop_rx => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill daemon");
                }
                sink.drain(&mut lines).await;
                return;
            }
            exit = child.wait() => break exit,
            Some((stream, line)) = lines.recv() => sink.handle(stream, line).await,
        }
    };

    sink.drain(&mut lines).await;
    let reason = describe_exit(exit);
    error!(reason = %reason, "Daemon exited unexpectedly");

    remove_scratch(&torrc).await;
    sink.status_tx.send_replace(DaemonStatus {
        state: DaemonState::Stopped,
        last_error: Some(reason),
    });
}

fn describe_exit(exit: std::io::Result<ExitStatus>) -> String {
    match exit {
        Ok(status) => match status.code() {
            Some(code) => format!("daemon exited unexpectedly with code {code}"),
            None => format!("daemon exited unexpectedly ({status})"),
        },
        Err(e) => format!("lost track of daemon process: {e}"),
    }
}

async fn remove_scratch(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed daemon config"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove daemon config"),
    }
}
