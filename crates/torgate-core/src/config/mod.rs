//! Configuration management for torgate
//!
//! Application configuration is a TOML file with one table per component.
//! Every table is optional; missing keys take their defaults.
//!
//! User preferences that a front end edits (bridge text, theme) live
//! separately in the JSON [`settings`] file.

pub mod settings;

pub use settings::{Settings, SettingsStore, Theme};

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::blocklist::{BlockPolicy, MatchRule, RuleSet};
use crate::daemon::{DaemonConfig, SupervisorOptions};
use crate::error::{Error, Result};
use crate::ports::{PortRequest, PortSet};
use crate::proxy::{ProxyOptions, DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_HEADER_SIZE};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Forwarding proxy
    pub proxy: ProxyConfig,
    /// Anonymity-network daemon
    pub daemon: DaemonSection,
    /// Identity rotation
    pub rotation: RotationConfig,
    /// Host blocklist
    pub blocklist: BlocklistConfig,
    /// User settings file
    pub settings: SettingsConfig,
    /// OS proxy toggling
    pub system_proxy: SystemProxyConfig,
    /// Logging
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| Error::ConfigNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Error::from)
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.proxy.max_header_size < 1024 {
            return Err(Error::config_value(
                "proxy.max_header_size",
                "Must be at least 1024 bytes",
            ));
        }
        if self.proxy.max_body_size == 0 {
            return Err(Error::config_value(
                "proxy.max_body_size",
                "Must be greater than 0",
            ));
        }
        if self.proxy.connect_timeout_secs == 0 {
            return Err(Error::config_value(
                "proxy.connect_timeout_secs",
                "Must be greater than 0",
            ));
        }
        if self.daemon.bootstrap_timeout_secs == 0 {
            return Err(Error::config_value(
                "daemon.bootstrap_timeout_secs",
                "Must be greater than 0",
            ));
        }
        if self.rotation.enabled && self.rotation.interval_secs == 0 {
            return Err(Error::config_value(
                "rotation.interval_secs",
                "Must be greater than 0 when rotation is enabled",
            ));
        }

        // fixed ports must not collide
        let fixed = [
            ("proxy.port", self.proxy.port),
            ("daemon.socks_port", self.daemon.socks_port),
            ("daemon.control_port", self.daemon.control_port),
            ("daemon.dns_port", self.daemon.dns_port),
        ];
        for (i, (key, port)) in fixed.iter().enumerate() {
            if *port == 0 {
                continue;
            }
            if let Some((other, _)) = fixed[i + 1..].iter().find(|(_, p)| p == port) {
                return Err(Error::config_value(
                    *key,
                    format!("Port {port} is also used by {other}"),
                ));
            }
        }

        self.blocklist.policy()?;
        Ok(())
    }

    /// Check user settings against this configuration
    ///
    /// Enabled bridges need parseable bridge text and a transport plugin.
    pub fn check_settings(&self, settings: &Settings) -> Result<()> {
        if settings.bridge {
            // ports do not matter for the bridge check
            self.daemon_config(
                PortSet {
                    proxy: 1,
                    socks: 2,
                    control: 3,
                    dns: 4,
                },
                settings,
            )?;
        }
        Ok(())
    }

    /// Ports to request from the allocator; `0` entries are allocated
    pub fn port_request(&self) -> PortRequest {
        PortRequest {
            proxy: self.proxy.port,
            socks: self.daemon.socks_port,
            control: self.daemon.control_port,
            dns: self.daemon.dns_port,
        }
    }

    /// Proxy server options
    pub fn proxy_options(&self) -> ProxyOptions {
        ProxyOptions {
            listen_ip: self.proxy.listen_addr,
            max_header_size: self.proxy.max_header_size,
            max_body_size: self.proxy.max_body_size,
            drain_timeout: Duration::from_secs(self.proxy.drain_timeout_secs),
            connect_timeout: Duration::from_secs(self.proxy.connect_timeout_secs),
        }
    }

    /// Daemon launch options
    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions::new(&self.daemon.binary, &self.daemon.work_dir)
            .with_args(self.daemon.args.iter().cloned())
    }

    /// Daemon config snapshot for `ports` and the current user settings
    pub fn daemon_config(&self, ports: PortSet, settings: &Settings) -> Result<DaemonConfig> {
        let mut cfg = DaemonConfig::new(ports.socks, ports.control, ports.dns);
        cfg.geoip_file = self.daemon.geoip_file.clone();
        cfg.geoip6_file = self.daemon.geoip6_file.clone();
        cfg.automap = self.daemon.automap;

        if settings.bridge {
            let Some(plugin) = &self.daemon.transport_plugin else {
                return Err(Error::config_value(
                    "daemon.transport_plugin",
                    "Bridges are enabled but no pluggable-transport binary is configured",
                ));
            };
            cfg = cfg.with_bridges(&settings.bridges, plugin)?;
        }
        Ok(cfg)
    }

    /// Bootstrap timeout
    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon.bootstrap_timeout_secs)
    }

    /// Rotation interval
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation.interval_secs)
    }
}

/// Forwarding proxy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listen address
    pub listen_addr: IpAddr,
    /// Listen port (0 = pick a free port)
    pub port: u16,
    /// Seconds in-flight tunnels may keep running after stop (0 = abort)
    pub drain_timeout_secs: u64,
    /// Upper bound for request line plus headers
    pub max_header_size: usize,
    /// Largest POST body forwarded, in bytes
    pub max_body_size: u64,
    /// SOCKS connect timeout
    pub connect_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            drain_timeout_secs: 0,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            connect_timeout_secs: 30,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    /// Daemon executable
    pub binary: PathBuf,
    /// Extra arguments placed before `-f <torrc>`
    pub args: Vec<String>,
    /// Scratch directory for the generated config and `tor.log`
    pub work_dir: PathBuf,
    /// IPv4 GeoIP database
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geoip_file: Option<PathBuf>,
    /// IPv6 GeoIP database
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geoip6_file: Option<PathBuf>,
    /// `AutomapHostsOnResolve`
    pub automap: bool,
    /// Pluggable-transport client binary used when bridges are on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_plugin: Option<PathBuf>,
    /// SOCKS port (0 = pick a free port)
    pub socks_port: u16,
    /// Control port (0 = pick a free port)
    pub control_port: u16,
    /// DNS port (0 = pick a free port)
    pub dns_port: u16,
    /// Seconds to wait for 100% bootstrap
    pub bootstrap_timeout_secs: u64,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(if cfg!(windows) { "tor.exe" } else { "tor" }),
            args: Vec::new(),
            work_dir: PathBuf::from("tor-data"),
            geoip_file: None,
            geoip6_file: None,
            automap: true,
            transport_plugin: None,
            socks_port: 0,
            control_port: 0,
            dns_port: 0,
            bootstrap_timeout_secs: 300,
        }
    }
}

/// Identity rotation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Rotate periodically while ready
    pub enabled: bool,
    /// Seconds between rotations
    pub interval_secs: u64,
    /// Control-port password (null authentication when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            password: None,
        }
    }
}

/// Blocklist configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlocklistConfig {
    /// JSON file with the host patterns
    pub file: PathBuf,
    /// Rules applied to CONNECT requests
    pub connect_rules: Vec<String>,
    /// Rules applied to plain HTTP requests
    pub http_rules: Vec<String>,
}

impl Default for BlocklistConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("blocked_hosts.json"),
            connect_rules: vec!["exact".into()],
            http_rules: vec!["exact".into(), "contains".into(), "wildcard_suffix".into()],
        }
    }
}

impl BlocklistConfig {
    /// Per-path rule policy
    pub fn policy(&self) -> Result<BlockPolicy> {
        Ok(BlockPolicy {
            connect: rule_set("blocklist.connect_rules", &self.connect_rules)?,
            http: rule_set("blocklist.http_rules", &self.http_rules)?,
        })
    }
}

fn rule_set(key: &str, names: &[String]) -> Result<RuleSet> {
    let rules = names
        .iter()
        .map(|name| {
            MatchRule::from_name(name)
                .ok_or_else(|| Error::config_value(key, format!("Unknown match rule '{name}'")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(RuleSet::from_rules(&rules))
}

/// Settings file location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// JSON settings file
    pub file: PathBuf,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("settings.json"),
        }
    }
}

/// OS proxy toggling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemProxyConfig {
    /// Point the OS proxy at torgate once bootstrap completes
    pub enabled: bool,
}

impl Default for SystemProxyConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log file path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Use JSON format
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json_format: false,
        }
    }
}
