//! Daemon configuration text
//!
//! The daemon reads a plain-text file with one directive per line. Order
//! matters to nobody but humans reading `tor.log`, but it is fixed anyway so
//! generated files are stable:
//!
//! ```text
//! SocksPort 9050
//! Log notice stdout
//! ControlPort 9051
//! GeoIPFile /path/geoip
//! GeoIPv6File /path/geoip6
//! DNSPort 5353
//! AutomapHostsOnResolve 1
//! UseBridges 1
//! ClientTransportPlugin obfs4 exec /path/lyrebird
//! Bridge obfs4 1.2.3.4:443 FINGERPRINT
//! ```

use std::path::PathBuf;

use super::bridge::{parse_bridges, BridgeSet, TransportType};
use crate::error::{Error, Result};

/// Log directive the bootstrap tracker depends on
pub const LOG_DIRECTIVE: &str = "notice stdout";

/// Bridge part of a [`DaemonConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Transport and bridge lines
    pub bridges: BridgeSet,
    /// Pluggable-transport client binary
    pub plugin_path: PathBuf,
}

/// Snapshot of everything the generated config contains
///
/// Built fresh for every start; changing it requires a daemon restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// SOCKS5 listener port
    pub socks_port: u16,
    /// Control port
    pub control_port: u16,
    /// DNS listener port
    pub dns_port: u16,
    /// IPv4 GeoIP database
    pub geoip_file: Option<PathBuf>,
    /// IPv6 GeoIP database
    pub geoip6_file: Option<PathBuf>,
    /// Map unknown hostnames to virtual addresses on resolve
    pub automap: bool,
    /// Bridges, when enabled
    pub bridge: Option<BridgeConfig>,
}

impl DaemonConfig {
    /// Config with the given ports, automap on and no bridges
    pub fn new(socks_port: u16, control_port: u16, dns_port: u16) -> Self {
        Self {
            socks_port,
            control_port,
            dns_port,
            geoip_file: None,
            geoip6_file: None,
            automap: true,
            bridge: None,
        }
    }

    /// Enable bridges from user-supplied bridge text
    ///
    /// The text is run through [`parse_bridges`]; an unsupported or missing
    /// transport is an error rather than a silently dropped bridge block.
    pub fn with_bridges(mut self, text: &str, plugin_path: impl Into<PathBuf>) -> Result<Self> {
        let bridges = parse_bridges(text)?;
        self.bridge = Some(BridgeConfig {
            bridges,
            plugin_path: plugin_path.into(),
        });
        Ok(self)
    }

    /// Check ports and bridge settings
    pub fn validate(&self) -> Result<()> {
        let ports = [
            ("socks_port", self.socks_port),
            ("control_port", self.control_port),
            ("dns_port", self.dns_port),
        ];
        for (key, port) in ports {
            if port == 0 {
                return Err(Error::config_value(key, "port must be assigned before start"));
            }
        }
        if self.socks_port == self.control_port
            || self.socks_port == self.dns_port
            || self.control_port == self.dns_port
        {
            return Err(Error::config_value("ports", "daemon ports must be distinct"));
        }

        if let Some(bridge) = &self.bridge {
            if bridge.bridges.lines.is_empty() {
                return Err(Error::Bridge("bridges enabled but no bridge lines given".into()));
            }
            if bridge.plugin_path.as_os_str().is_empty() {
                return Err(Error::Bridge(format!(
                    "no pluggable-transport binary configured for {}",
                    bridge.bridges.transport
                )));
            }
        }
        Ok(())
    }

    /// Render the configuration text
    pub fn to_torrc(&self) -> String {
        build_config(self)
    }

    /// Parse configuration text back into its directives
    pub fn parse_directives(text: &str) -> Result<Directives> {
        parse_directives(text)
    }
}

/// Render `cfg` as daemon configuration text
pub fn build_config(cfg: &DaemonConfig) -> String {
    let mut out = String::new();
    let mut directive = |key: &str, value: &str| {
        out.push_str(key);
        out.push(' ');
        out.push_str(value);
        out.push('\n');
    };

    directive("SocksPort", &cfg.socks_port.to_string());
    directive("Log", LOG_DIRECTIVE);
    directive("ControlPort", &cfg.control_port.to_string());
    if let Some(path) = &cfg.geoip_file {
        directive("GeoIPFile", &path.display().to_string());
    }
    if let Some(path) = &cfg.geoip6_file {
        directive("GeoIPv6File", &path.display().to_string());
    }
    directive("DNSPort", &cfg.dns_port.to_string());
    directive("AutomapHostsOnResolve", if cfg.automap { "1" } else { "0" });

    if let Some(bridge) = &cfg.bridge {
        let transport = bridge.bridges.transport;
        directive("UseBridges", "1");
        directive(
            "ClientTransportPlugin",
            &format!("{transport} exec {}", bridge.plugin_path.display()),
        );
        for line in &bridge.bridges.lines {
            directive("Bridge", &format!("{transport} {line}"));
        }
    }

    out
}

/// Directives recovered from configuration text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    /// `SocksPort`
    pub socks_port: Option<u16>,
    /// `ControlPort`
    pub control_port: Option<u16>,
    /// `DNSPort`
    pub dns_port: Option<u16>,
    /// `Log`
    pub log: Option<String>,
    /// `GeoIPFile`
    pub geoip_file: Option<PathBuf>,
    /// `GeoIPv6File`
    pub geoip6_file: Option<PathBuf>,
    /// `AutomapHostsOnResolve`
    pub automap: Option<bool>,
    /// `UseBridges`
    pub use_bridges: bool,
    /// `ClientTransportPlugin <transport> exec <path>`
    pub transport_plugin: Option<(TransportType, PathBuf)>,
    /// `Bridge <transport> <line>`, in order
    pub bridges: Vec<(TransportType, String)>,
}

impl Directives {
    /// Rebuild the [`DaemonConfig`] these directives describe
    pub fn to_config(&self) -> Result<DaemonConfig> {
        let port = |value: Option<u16>, key: &str| {
            value.ok_or_else(|| Error::config_value(key, "directive missing"))
        };

        let bridge = if self.use_bridges {
            let Some((transport, plugin_path)) = self.transport_plugin.clone() else {
                return Err(Error::Bridge("UseBridges without ClientTransportPlugin".into()));
            };
            let mut lines = Vec::with_capacity(self.bridges.len());
            for (line_transport, line) in &self.bridges {
                if *line_transport != transport {
                    return Err(Error::Bridge(format!(
                        "bridge uses '{line_transport}' but plugin is for '{transport}'"
                    )));
                }
                lines.push(line.clone());
            }
            Some(BridgeConfig {
                bridges: BridgeSet { transport, lines },
                plugin_path,
            })
        } else {
            None
        };

        Ok(DaemonConfig {
            socks_port: port(self.socks_port, "SocksPort")?,
            control_port: port(self.control_port, "ControlPort")?,
            dns_port: port(self.dns_port, "DNSPort")?,
            geoip_file: self.geoip_file.clone(),
            geoip6_file: self.geoip6_file.clone(),
            automap: self.automap.unwrap_or(false),
            bridge,
        })
    }
}

/// Parse daemon configuration text
///
/// Unknown directives and `#` comments are skipped.
pub fn parse_directives(text: &str) -> Result<Directives> {
    let mut d = Directives::default();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once(char::is_whitespace)
            .map(|(k, v)| (k, v.trim()))
            .unwrap_or((line, ""));
        let bad = |what: &str| Error::Config(format!("line {}: {what}: {line:?}", idx + 1));

        match key {
            "SocksPort" => d.socks_port = Some(value.parse().map_err(|_| bad("invalid port"))?),
            "ControlPort" => d.control_port = Some(value.parse().map_err(|_| bad("invalid port"))?),
            "DNSPort" => d.dns_port = Some(value.parse().map_err(|_| bad("invalid port"))?),
            "Log" => d.log = Some(value.to_string()),
            "GeoIPFile" => d.geoip_file = Some(PathBuf::from(value)),
            "GeoIPv6File" => d.geoip6_file = Some(PathBuf::from(value)),
            "AutomapHostsOnResolve" => d.automap = Some(parse_flag(value).ok_or_else(|| bad("expected 0 or 1"))?),
            "UseBridges" => d.use_bridges = parse_flag(value).ok_or_else(|| bad("expected 0 or 1"))?,
            "ClientTransportPlugin" => {
                let mut parts = value.splitn(3, char::is_whitespace);
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(transport), Some("exec"), Some(path)) if !path.trim().is_empty() => {
                        d.transport_plugin = Some((transport.parse()?, PathBuf::from(path.trim())));
                    }
                    _ => return Err(bad("expected '<transport> exec <path>'")),
                }
            }
            "Bridge" => {
                let Some((transport, rest)) = value.split_once(char::is_whitespace) else {
                    return Err(bad("expected '<transport> <bridge>'"));
                };
                d.bridges.push((transport.parse()?, rest.trim().to_string()));
            }
            _ => {}
        }
    }

    Ok(d)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}
