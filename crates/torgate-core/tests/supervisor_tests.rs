//! Integration tests for the daemon supervisor, driven by a fake daemon
//! shell script

#![cfg(unix)]

mod common;

use std::time::Duration;

use common::{write_daemon_script, BOOTSTRAPPING_DAEMON, CRASHING_DAEMON};
use tokio::time::timeout;
use torgate_core::{DaemonConfig, DaemonState, DaemonSupervisor, SupervisorOptions};

const WAIT: Duration = Duration::from_secs(10);

fn supervisor(dir: &std::path::Path, script_body: &str) -> DaemonSupervisor {
    let script = write_daemon_script(dir, script_body);
    let work = dir.join("work");
    DaemonSupervisor::new(SupervisorOptions::new("/bin/sh", work).with_args([script]))
}

fn config() -> DaemonConfig {
    DaemonConfig::new(19050, 19051, 15353)
}

#[tokio::test]
async fn test_bootstrap_progress_reaches_ready() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), BOOTSTRAPPING_DAEMON);
    let mut rx = sup.subscribe();

    sup.start(&config()).await.unwrap();
    assert!(sup.torrc_path().exists());

    let mut seen = Vec::new();
    timeout(WAIT, async {
        loop {
            let state = rx.borrow_and_update().state;
            seen.push(state.progress());
            if state == DaemonState::Ready {
                break;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
    assert!(seen.contains(&50), "50% never observed: {seen:?}");
    assert_eq!(seen.last(), Some(&100));

    let args = std::fs::read_to_string(dir.path().join("work").join("args.txt")).unwrap();
    assert_eq!(args.trim(), format!("-f {}", sup.torrc_path().display()));

    let log = std::fs::read_to_string(sup.log_path()).unwrap();
    assert!(log.contains("Bootstrapped 100% (done)"));
    assert!(log.contains("warning on stderr"));

    sup.stop().await;
}

#[tokio::test]
async fn test_wait_ready_and_stop_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), BOOTSTRAPPING_DAEMON);

    sup.start(&config()).await.unwrap();
    sup.wait_ready(WAIT).await.unwrap();
    let pid = sup.pid().await.unwrap();

    timeout(WAIT, sup.stop()).await.unwrap();
    assert_eq!(sup.state(), DaemonState::Stopped);
    assert!(sup.status().last_error.is_none());
    assert!(!sup.torrc_path().exists());
    assert!(sup.pid().await.is_none());

    #[cfg(target_os = "linux")]
    assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
    let _ = pid;
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), BOOTSTRAPPING_DAEMON);

    sup.start(&config()).await.unwrap();
    let first = sup.pid().await;
    sup.start(&config()).await.unwrap();
    assert_eq!(sup.pid().await, first);

    sup.stop().await;
    // stopping twice is harmless
    sup.stop().await;
    assert_eq!(sup.state(), DaemonState::Stopped);
}

#[tokio::test]
async fn test_unexpected_exit_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), CRASHING_DAEMON);
    let mut rx = sup.subscribe();

    sup.start(&config()).await.unwrap();
    let status = timeout(WAIT, rx.wait_for(|s| s.state == DaemonState::Stopped && s.last_error.is_some()))
        .await
        .unwrap()
        .unwrap()
        .clone();

    let reason = status.last_error.unwrap();
    assert!(reason.contains("code 3"), "{reason}");
    assert!(!sup.torrc_path().exists());
    assert!(sup.wait_ready(Duration::from_millis(100)).await.is_err());

    let log = std::fs::read_to_string(sup.log_path()).unwrap();
    assert!(log.contains("Reading config failed"));

    sup.stop().await;
    assert!(sup.status().last_error.is_some());
}

#[tokio::test]
async fn test_restart_after_crash() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), CRASHING_DAEMON);
    let mut rx = sup.subscribe();

    sup.start(&config()).await.unwrap();
    timeout(WAIT, rx.wait_for(|s| s.state == DaemonState::Stopped && s.last_error.is_some()))
        .await
        .unwrap()
        .unwrap();

    // replace the script, then start again without an explicit stop
    write_daemon_script(dir.path(), BOOTSTRAPPING_DAEMON);
    sup.start(&config()).await.unwrap();
    sup.wait_ready(WAIT).await.unwrap();
    assert!(sup.status().last_error.is_none());

    sup.restart(&config()).await.unwrap();
    sup.wait_ready(WAIT).await.unwrap();
    sup.stop().await;
}
