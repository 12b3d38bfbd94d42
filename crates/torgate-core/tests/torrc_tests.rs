//! Integration tests for daemon configuration text

use proptest::prelude::*;
use torgate_core::daemon::{parse_directives, BridgeConfig, BridgeSet, TransportType};
use torgate_core::{Config, DaemonConfig, PortSet, Settings};

fn transport() -> impl Strategy<Value = TransportType> {
    prop::sample::select(TransportType::ALL.to_vec())
}

fn bridge_line() -> impl Strategy<Value = String> {
    ("[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}", 1u16.., "[A-F0-9]{40}")
        .prop_map(|(ip, port, fp)| format!("{ip}:{port} {fp}"))
}

fn bridge() -> impl Strategy<Value = Option<BridgeConfig>> {
    prop::option::of(
        (transport(), prop::collection::vec(bridge_line(), 1..4)).prop_map(|(transport, lines)| {
            BridgeConfig {
                bridges: BridgeSet { transport, lines },
                plugin_path: "/opt/pt/client".into(),
            }
        }),
    )
}

proptest! {
    #[test]
    fn build_then_parse_reproduces_config(
        socks in 1u16..,
        control in 1u16..,
        dns in 1u16..,
        automap in any::<bool>(),
        bridge in bridge(),
    ) {
        let cfg = DaemonConfig {
            socks_port: socks,
            control_port: control,
            dns_port: dns,
            geoip_file: None,
            geoip6_file: None,
            automap,
            bridge,
        };
        let parsed = parse_directives(&cfg.to_torrc()).unwrap();
        prop_assert_eq!(parsed.socks_port, Some(socks));
        prop_assert_eq!(parsed.control_port, Some(control));
        prop_assert_eq!(parsed.dns_port, Some(dns));
        prop_assert_eq!(parsed.automap, Some(automap));
        prop_assert_eq!(parsed.use_bridges, cfg.bridge.is_some());
        prop_assert_eq!(parsed.to_config().unwrap(), cfg);
    }
}

fn ports() -> PortSet {
    PortSet {
        proxy: 8118,
        socks: 9050,
        control: 9051,
        dns: 5353,
    }
}

#[test]
fn test_bridge_disabled_has_no_bridge_lines() {
    let config = Config::default();
    let text = config
        .daemon_config(ports(), &Settings::default())
        .unwrap()
        .to_torrc();

    assert!(!text.contains("UseBridges"));
    assert!(!text.lines().any(|l| l.starts_with("Bridge ")));
    assert!(!text.contains("ClientTransportPlugin"));
}

#[test]
fn test_bridge_enabled_emits_bridge_block() {
    let mut config = Config::default();
    config.daemon.transport_plugin = Some("/opt/pt/lyrebird".into());
    let settings = Settings {
        bridge: true,
        bridges: "obfs4 1.2.3.4:443 FINGERPRINT".into(),
        ..Settings::default()
    };

    let text = config.daemon_config(ports(), &settings).unwrap().to_torrc();
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines.contains(&"UseBridges 1"));
    assert!(lines.contains(&"ClientTransportPlugin obfs4 exec /opt/pt/lyrebird"));
    assert!(lines.contains(&"Bridge obfs4 1.2.3.4:443 FINGERPRINT"));

    let plugin = lines.iter().position(|l| l.starts_with("ClientTransportPlugin"));
    let bridge = lines.iter().position(|l| l.starts_with("Bridge "));
    assert!(plugin < bridge);
}

#[test]
fn test_unrecognized_bridge_text_is_reported() {
    let mut config = Config::default();
    config.daemon.transport_plugin = Some("/opt/pt/lyrebird".into());
    let settings = Settings {
        bridge: true,
        bridges: "1.2.3.4:443 FINGERPRINT".into(),
        ..Settings::default()
    };
    assert!(config.daemon_config(ports(), &settings).is_err());
}
