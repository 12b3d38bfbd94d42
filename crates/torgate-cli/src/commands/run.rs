//! Run command - start the proxy and the Tor daemon until interrupted

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::Colorize;
use tokio::sync::{broadcast, watch};
use torgate_core::blocklist::store;
use torgate_core::proxy::Decision;
use torgate_core::{Config, DaemonState, Launcher, PortSet, RequestRecord, Settings, SettingsStore};
use torgate_platform::default_system_proxy;
use tracing::{info, warn};

/// Request counters for the session summary
#[derive(Debug, Default)]
struct RequestStats {
    tunneled: u64,
    blocked: u64,
    failed: u64,
    bytes: u64,
}

impl RequestStats {
    fn observe(&mut self, record: &RequestRecord) {
        match record.decision {
            Decision::Tunneled => self.tunneled += 1,
            Decision::Blocked => self.blocked += 1,
            Decision::Failed => self.failed += 1,
        }
        self.bytes += record.bytes;
    }
}

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Proxy listen port (0 = pick a free port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bridge lines to use for this session; enables bridges
    #[arg(long, value_name = "TEXT")]
    pub bridges: Option<String>,

    /// Leave the operating system proxy settings untouched
    #[arg(long)]
    pub no_system_proxy: bool,

    /// Check configuration, settings and blocklist, then exit
    #[arg(long)]
    pub dry_run: bool,
}

/// Execute the run command
pub fn execute(args: RunArgs, mut config: Config) -> Result<()> {
    // command-line overrides
    if let Some(port) = args.port {
        config.proxy.port = port;
    }
    if args.no_system_proxy {
        config.system_proxy.enabled = false;
    }
    config.validate().context("Configuration validation failed")?;

    let settings = load_settings(&config, args.bridges)?;

    let policy = config
        .blocklist
        .policy()
        .context("Invalid blocklist rules in config")?;
    let blocklist = store::load_blocklist(&config.blocklist.file)
        .with_context(|| format!("Failed to load blocklist from {}", config.blocklist.file.display()))?
        .with_policy(policy);
    info!(patterns = blocklist.len(), "Loaded blocklist");

    if args.dry_run {
        warn!("Dry run mode - nothing will be started");
        info!("Configuration validated successfully");
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(serve(config, settings, Arc::new(blocklist)))
}

fn load_settings(config: &Config, bridges: Option<String>) -> Result<Settings> {
    let mut settings = SettingsStore::load(&config.settings.file)
        .with_context(|| format!("Failed to load settings from {}", config.settings.file.display()))?
        .settings();

    // --bridges applies to this session only
    if let Some(text) = bridges {
        settings.bridges = text;
        settings.bridge = true;
    }
    config
        .check_settings(&settings)
        .context("Bridge settings are not usable")?;
    Ok(settings)
}

async fn serve(config: Config, settings: Settings, blocklist: Arc<torgate_core::Blocklist>) -> Result<()> {
    // Set up signal handler
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    })
    .context("Failed to set signal handler")?;

    let bootstrap_timeout = config.bootstrap_timeout();
    let launcher = Launcher::new(config, blocklist, default_system_proxy());

    let mut status = launcher.daemon().subscribe();
    let mut requests = launcher.proxy().subscribe();

    let ports = launcher.start(&settings).await.context("Failed to start")?;
    print_ports(&launcher, &ports);

    let deadline = tokio::time::sleep(bootstrap_timeout);
    tokio::pin!(deadline);
    let mut ready = false;
    let mut last_progress = None;
    let mut feed_open = true;
    let mut stats = RequestStats::default();
    let started = std::time::Instant::now();

    let result = loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("Received interrupt signal, shutting down...");
                break Ok(());
            }
            _ = &mut deadline, if !ready => {
                break Err(anyhow!(
                    "Tor did not finish bootstrapping within {}s",
                    bootstrap_timeout.as_secs()
                ));
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break Err(anyhow!("Daemon supervisor went away"));
                }
                let current = status.borrow_and_update().clone();
                match current.state {
                    DaemonState::Bootstrapping(p) if last_progress != Some(p) => {
                        last_progress = Some(p);
                        info!("Bootstrapping {}%", p);
                    }
                    DaemonState::Ready if !ready => {
                        ready = true;
                        println!(
                            "{} Tor is ready; proxy listening on {}",
                            "✓".green(),
                            proxy_address(&launcher, &ports)
                        );
                    }
                    DaemonState::Stopped => {
                        let reason = current
                            .last_error
                            .unwrap_or_else(|| "daemon stopped".to_string());
                        break Err(anyhow!("Tor stopped: {reason}"));
                    }
                    _ => {}
                }
            }
            record = requests.recv(), if feed_open => match record {
                Ok(record) => stats.observe(&record),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Request log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => feed_open = false,
            },
        }
    };

    launcher.stop().await;

    info!(
        "Session ended: {} tunneled, {} blocked, {} failed, {} bytes sent in {:.1}s",
        stats.tunneled,
        stats.blocked,
        stats.failed,
        stats.bytes,
        started.elapsed().as_secs_f64()
    );
    result
}

fn proxy_address(launcher: &Launcher, ports: &PortSet) -> String {
    match launcher.proxy().local_addr() {
        Some(addr) => addr.to_string(),
        None => format!("{}:{}", launcher.config().proxy.listen_addr, ports.proxy),
    }
}

fn print_ports(launcher: &Launcher, ports: &PortSet) {
    println!("  Proxy:   {}", proxy_address(launcher, ports).cyan());
    println!("  SOCKS:   127.0.0.1:{}", ports.socks);
    println!("  Control: 127.0.0.1:{}", ports.control);
    println!("  DNS:     127.0.0.1:{}", ports.dns);
    println!();
    println!("Waiting for Tor to bootstrap... (Ctrl-C to stop)");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_settings_bridges_override() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.settings.file = dir.path().join("settings.json");

        // bridges without a plugin path cannot be used
        assert!(load_settings(&config, Some("obfs4 1.2.3.4:443 FP".into())).is_err());

        config.daemon.transport_plugin = Some(dir.path().join("obfs4proxy"));
        let settings = load_settings(&config, Some("obfs4 1.2.3.4:443 FP".into())).unwrap();
        assert!(settings.bridge);
        assert_eq!(settings.bridges, "obfs4 1.2.3.4:443 FP");

        let settings = load_settings(&config, None).unwrap();
        assert!(!settings.bridge);
    }

    #[test]
    fn test_request_stats() {
        let mut stats = RequestStats::default();
        for (decision, bytes) in [(Decision::Tunneled, 10), (Decision::Blocked, 0), (Decision::Failed, 5)] {
            stats.observe(&RequestRecord {
                method: "GET".into(),
                target: "example.com".into(),
                bytes,
                decision,
                status: 200,
            });
        }
        assert_eq!((stats.tunneled, stats.blocked, stats.failed, stats.bytes), (1, 1, 1, 15));
    }
}
