//! Start/stop coordination of proxy, daemon, rotation and system proxy
//!
//! ```text
//! start() -> allocate ports -> proxy.start -> daemon.start
//!                                                 |
//!                                     status == Ready?  -> system proxy on
//!                                                          rotation on
//!                                     leaves Ready      -> both off
//! stop()  -> rotation off -> system proxy off -> proxy.stop -> daemon.stop
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::blocklist::Blocklist;
use crate::config::{Config, Settings};
use crate::control::{rotate_best_effort, ControlClient, RotationTask};
use crate::daemon::{DaemonState, DaemonStatus, DaemonSupervisor};
use crate::error::Result;
use crate::ports::{PortAllocator, PortSet};
use crate::proxy::ProxyServer;
use crate::system_proxy::SystemProxy;

struct Session {
    ports: PortSet,
    stop_tx: watch::Sender<bool>,
    watcher: JoinHandle<()>,
}

/// Runs one proxy + daemon session at a time
pub struct Launcher {
    config: Config,
    proxy: ProxyServer,
    daemon: DaemonSupervisor,
    system_proxy: Arc<dyn SystemProxy>,
    session: Mutex<Option<Session>>,
}

impl Launcher {
    /// Create a stopped launcher
    pub fn new(config: Config, blocklist: Arc<Blocklist>, system_proxy: Arc<dyn SystemProxy>) -> Self {
        let proxy = ProxyServer::with_options(blocklist, config.proxy_options());
        let daemon = DaemonSupervisor::new(config.supervisor_options());
        Self {
            config,
            proxy,
            daemon,
            system_proxy,
            session: Mutex::new(None),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The forwarding proxy
    pub fn proxy(&self) -> &ProxyServer {
        &self.proxy
    }

    /// The daemon supervisor
    pub fn daemon(&self) -> &DaemonSupervisor {
        &self.daemon
    }

    /// Ports of the running session
    pub async fn ports(&self) -> Option<PortSet> {
        self.session.lock().await.as_ref().map(|s| s.ports)
    }

    /// Start proxy and daemon with the bridge choice from `settings`
    ///
    /// Returns once the daemon is spawned; readiness is reported through
    /// [`DaemonSupervisor::subscribe`]. A second call while running returns
    /// the ports of the running session. A session whose daemon has exited
    /// is torn down and replaced.
    pub async fn start(&self, settings: &Settings) -> Result<PortSet> {
        let mut session = self.session.lock().await;
        if let Some(running) = session.as_ref() {
            if self.daemon.state() != DaemonState::Stopped {
                return Ok(running.ports);
            }
            warn!("Daemon exited; replacing the stale session");
            if let Some(stale) = session.take() {
                self.teardown(stale).await;
            }
        }

        let ports = PortAllocator::new().allocate_set(self.config.port_request())?;
        let daemon_config = self.config.daemon_config(ports, settings)?;
        info!(
            proxy = ports.proxy,
            socks = ports.socks,
            control = ports.control,
            dns = ports.dns,
            bridges = daemon_config.bridge.is_some(),
            "Starting session"
        );

        let proxy_addr = self.proxy.start(ports.proxy, ports.socks).await?;
        if let Err(e) = self.daemon.start(&daemon_config).await {
            self.proxy.stop().await;
            return Err(e);
        }

        let hooks = ReadyHooks {
            system_proxy: self
                .config
                .system_proxy
                .enabled
                .then(|| Arc::clone(&self.system_proxy)),
            proxy_address: system_proxy_address(proxy_addr),
            rotation: self.config.rotation.enabled.then(|| {
                (
                    self.control_client(ports.control),
                    self.config.rotation_interval(),
                )
            }),
        };
        let (stop_tx, stop_rx) = watch::channel(false);
        let watcher = tokio::spawn(watch_readiness(self.daemon.subscribe(), stop_rx, hooks));

        *session = Some(Session {
            ports,
            stop_tx,
            watcher,
        });
        Ok(ports)
    }

    /// Tear the session down
    ///
    /// Rotation and the system proxy are switched off first, then in-flight
    /// tunnels are closed and the daemon is terminated.
    pub async fn stop(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };
        self.teardown(session).await;
    }

    async fn teardown(&self, session: Session) {
        let _ = session.stop_tx.send(true);
        if let Err(e) = session.watcher.await {
            warn!(error = %e, "Readiness watcher ended abnormally");
        }
        self.proxy.stop().await;
        self.daemon.stop().await;
        info!("Session stopped");
    }

    /// Stop and start again, picking up changed bridge settings
    pub async fn restart(&self, settings: &Settings) -> Result<PortSet> {
        self.stop().await;
        self.start(settings).await
    }

    /// Wait for the daemon to finish bootstrapping
    pub async fn wait_ready(&self) -> Result<()> {
        self.daemon.wait_ready(self.config.bootstrap_timeout()).await
    }

    /// Request a new identity now; failures are logged, not returned
    pub async fn rotate_now(&self) -> bool {
        let Some(ports) = self.ports().await else {
            warn!("Identity rotation requested while stopped");
            return false;
        };
        rotate_best_effort(&self.control_client(ports.control)).await
    }

    fn control_client(&self, port: u16) -> ControlClient {
        ControlClient::localhost(port).with_password(self.config.rotation.password.clone())
    }
}

/// `host:port` other applications should use as their proxy
fn system_proxy_address(addr: SocketAddr) -> String {
    if addr.ip().is_unspecified() {
        format!("127.0.0.1:{}", addr.port())
    } else {
        addr.to_string()
    }
}

struct ReadyHooks {
    system_proxy: Option<Arc<dyn SystemProxy>>,
    proxy_address: String,
    rotation: Option<(ControlClient, Duration)>,
}

struct Active {
    rotation: Option<RotationTask>,
    system_proxy_on: bool,
}

impl ReadyHooks {
    fn activate(&self) -> Active {
        let system_proxy_on = match &self.system_proxy {
            Some(sp) => match sp.set_system_proxy(true, &self.proxy_address) {
                Ok(()) => {
                    info!(address = %self.proxy_address, "System proxy enabled");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "Failed to enable system proxy");
                    false
                }
            },
            None => false,
        };

        let rotation = self
            .rotation
            .as_ref()
            .map(|(client, interval)| RotationTask::spawn(client.clone(), *interval));

        Active {
            rotation,
            system_proxy_on,
        }
    }

    async fn deactivate(&self, active: Active) {
        if let Some(rotation) = active.rotation {
            rotation.stop().await;
        }
        if active.system_proxy_on {
            if let Some(sp) = &self.system_proxy {
                match sp.set_system_proxy(false, &self.proxy_address) {
                    Ok(()) => info!("System proxy disabled"),
                    Err(e) => warn!(error = %e, "Failed to disable system proxy"),
                }
            }
        }
    }
}

async fn watch_readiness(
    mut status_rx: watch::Receiver<DaemonStatus>,
    mut stop_rx: watch::Receiver<bool>,
    hooks: ReadyHooks,
) {
    let mut active: Option<Active> = None;

    loop {
        let ready = status_rx.borrow_and_update().state == DaemonState::Ready;
        match (ready, active.take()) {
            (true, None) => {
                info!("Daemon ready");
                active = Some(hooks.activate());
            }
            (false, Some(was)) => {
                warn!("Daemon left ready state");
                hooks.deactivate(was).await;
            }
            (_, still) => active = still,
        }

        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = stop_rx.changed() => break,
        }
    }

    if let Some(was) = active {
        hooks.deactivate(was).await;
    }
}
