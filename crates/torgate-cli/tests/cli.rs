//! Command-line smoke tests

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const BASE_CONFIG: &str = r#"
[blocklist]
file = "hosts.json"

[settings]
file = "settings.json"
"#;

fn workspace(config: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("torgate.toml"), config).unwrap();
    dir
}

fn torgate(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("torgate").unwrap();
    cmd.current_dir(dir)
        .env_remove("TORGATE_CONFIG")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .args(["-c", "torgate.toml"]);
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("torgate")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("run")
                .and(predicate::str::contains("blocklist"))
                .and(predicate::str::contains("bridge"))
                .and(predicate::str::contains("rotate")),
        );
}

#[test]
fn test_missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("torgate")
        .unwrap()
        .current_dir(dir.path())
        .args(["-c", "absent.toml", "config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.toml"));
}

#[test]
fn test_config_generate_then_validate() {
    let dir = workspace(BASE_CONFIG);

    torgate(dir.path())
        .args(["config", "generate", "-o", "generated.toml"])
        .assert()
        .success();
    assert!(dir.path().join("generated.toml").exists());

    // refuses to overwrite
    torgate(dir.path())
        .args(["config", "generate", "-o", "generated.toml"])
        .assert()
        .failure();

    torgate(dir.path())
        .args(["config", "validate", "generated.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_config_validate_rejects_bad_values() {
    let dir = workspace("[rotation]\nenabled = true\ninterval_secs = 0\n");
    torgate(dir.path())
        .args(["config", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("rotation.interval_secs"));
}

#[test]
fn test_blocklist_workflow() {
    let dir = workspace(BASE_CONFIG);

    torgate(dir.path())
        .args(["blocklist", "add", "Tracker.Example"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added 'tracker.example'"));

    let saved = std::fs::read_to_string(dir.path().join("hosts.json")).unwrap();
    assert!(saved.contains("\"tracker.example\""));

    torgate(dir.path())
        .args(["blocklist", "list"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("tracker.example")
                .and(predicate::str::is_match(r"Total patterns: \S*1").unwrap()),
        );

    // exact host: blocked on both paths
    torgate(dir.path())
        .args(["blocklist", "check", "tracker.example"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"CONNECT\s+\S*blocked").unwrap())
        .stdout(predicate::str::is_match(r"HTTP\s+\S*blocked").unwrap());

    // substring of a pattern: only the HTTP path applies the contains rule
    torgate(dir.path())
        .args(["blocklist", "check", "tracker"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"CONNECT\s+\S*allowed").unwrap())
        .stdout(predicate::str::is_match(r"HTTP\s+\S*blocked").unwrap());

    torgate(dir.path())
        .args(["blocklist", "remove", "tracker.example"])
        .assert()
        .success();

    torgate(dir.path())
        .args(["blocklist", "remove", "tracker.example"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not in the blocklist"));
}

#[test]
fn test_bridge_settings() {
    let dir = workspace(BASE_CONFIG);

    torgate(dir.path())
        .args(["bridge", "set", "carrier-pigeon 1.2.3.4:443 FP"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("carrier-pigeon"));
    assert!(!dir.path().join("settings.json").exists());

    // no transport plugin configured: stored, with a warning
    torgate(dir.path())
        .args(["bridge", "set", "--enable", "Bridge obfs4 1.2.3.4:443 FP cert=abc iat-mode=0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stored 1 obfs4 bridge(s)"))
        .stdout(predicate::str::contains("transport_plugin"));

    let saved = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
    assert!(saved.contains("\"bridge\": true"));
    assert!(saved.contains("obfs4 1.2.3.4:443 FP cert=abc iat-mode=0"));

    torgate(dir.path())
        .args(["bridge", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::is_match(r"Bridges: \S*enabled")
                .unwrap()
                .and(predicate::str::contains("Transport: obfs4")),
        );

    torgate(dir.path()).args(["bridge", "disable"]).assert().success();
    let saved = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
    assert!(saved.contains("\"bridge\": false"));
}

#[test]
fn test_bridge_enable_without_lines_fails() {
    let dir = workspace(BASE_CONFIG);
    torgate(dir.path())
        .args(["bridge", "enable"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No bridges stored"));
}

#[test]
fn test_config_torrc_with_fixed_ports() {
    let config = format!(
        "{BASE_CONFIG}\n[daemon]\nsocks_port = 19050\ncontrol_port = 19051\ndns_port = 19053\nautomap = false\n"
    );
    let dir = workspace(&config);

    torgate(dir.path())
        .args(["config", "torrc", "--check"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("SocksPort 19050")
                .and(predicate::str::contains("ControlPort 19051"))
                .and(predicate::str::contains("DNSPort 19053"))
                .and(predicate::str::contains("AutomapHostsOnResolve 0"))
                .and(predicate::str::contains("UseBridges").not()),
        )
        .stderr(predicate::str::contains("Round-trip check passed"));
}

#[test]
fn test_config_torrc_with_bridges() {
    let config = format!(
        "{BASE_CONFIG}\n[daemon]\nsocks_port = 19050\ncontrol_port = 19051\ndns_port = 19053\ntransport_plugin = \"/usr/bin/obfs4proxy\"\n"
    );
    let dir = workspace(&config);
    std::fs::write(
        dir.path().join("settings.json"),
        r#"{"bridges": "obfs4 1.2.3.4:443 FP", "bridge": true, "mode": "dark"}"#,
    )
    .unwrap();

    torgate(dir.path())
        .args(["config", "torrc"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("UseBridges 1")
                .and(predicate::str::contains("ClientTransportPlugin obfs4 exec /usr/bin/obfs4proxy"))
                .and(predicate::str::contains("Bridge obfs4 1.2.3.4:443 FP")),
        );
}

#[test]
fn test_run_dry_run() {
    let dir = workspace(BASE_CONFIG);
    std::fs::write(dir.path().join("hosts.json"), r#"["blocked.example"]"#).unwrap();

    torgate(dir.path())
        .args(["run", "--dry-run", "--port", "18118"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Configuration validated successfully"));
}

#[test]
fn test_run_bridges_without_plugin_fails() {
    let dir = workspace(BASE_CONFIG);
    torgate(dir.path())
        .args(["run", "--dry-run", "--bridges", "obfs4 1.2.3.4:443 FP"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("transport_plugin"));
}

#[test]
fn test_rotate_unreachable_control_port() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let dir = workspace(BASE_CONFIG);
    torgate(dir.path())
        .args(["rotate", "--control-port", &port.to_string(), "--timeout", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Identity rotation"));
}

#[test]
fn test_completions() {
    Command::cargo_bin("torgate")
        .unwrap()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("torgate"));
}
