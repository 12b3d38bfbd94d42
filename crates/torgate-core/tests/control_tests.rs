//! Integration tests for the control-port client

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use torgate_core::control::rotate_best_effort;
use torgate_core::{ControlClient, Error, RotationTask};

/// Fake control port accepting `password` (or null auth when `None`);
/// returns every command line it received
async fn fake_control_port(password: Option<&'static str>) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let commands = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&commands);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let mut session = BufReader::new(stream);
                let mut authenticated = false;
                loop {
                    let mut line = String::new();
                    if session.read_line(&mut line).await.unwrap_or(0) == 0 {
                        break;
                    }
                    let line = line.trim_end().to_string();
                    log.lock().unwrap().push(line.clone());

                    let reply: &[u8] = if line.starts_with("AUTHENTICATE") {
                        let expected = match password {
                            Some(pw) => format!("AUTHENTICATE \"{pw}\""),
                            None => "AUTHENTICATE".to_string(),
                        };
                        authenticated = line == expected;
                        if authenticated {
                            b"250 OK\r\n"
                        } else {
                            b"515 Authentication failed: Password did not match\r\n"
                        }
                    } else if !authenticated {
                        b"514 Authentication required.\r\n"
                    } else if line == "SIGNAL NEWNYM" {
                        b"250 OK\r\n"
                    } else if line == "QUIT" {
                        let _ = session.write_all(b"250 closing connection\r\n").await;
                        break;
                    } else {
                        b"510 Unrecognized command\r\n"
                    };
                    if session.write_all(reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (addr, commands)
}

#[tokio::test]
async fn test_rotate_with_null_auth() {
    let (addr, commands) = fake_control_port(None).await;
    ControlClient::new(addr).rotate_identity().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let seen = commands.lock().unwrap().clone();
    assert_eq!(seen[..2], ["AUTHENTICATE", "SIGNAL NEWNYM"]);
}

#[tokio::test]
async fn test_rotate_with_password() {
    let (addr, _) = fake_control_port(Some("hunter2")).await;
    ControlClient::new(addr)
        .with_password(Some("hunter2".into()))
        .rotate_identity()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_wrong_password_is_control_auth_error() {
    let (addr, commands) = fake_control_port(Some("hunter2")).await;
    let client = ControlClient::new(addr).with_password(Some("wrong".into()));

    let err = client.rotate_identity().await.unwrap_err();
    assert!(matches!(err, Error::ControlAuth(ref m) if m.contains("515")), "{err}");
    assert!(!commands.lock().unwrap().iter().any(|c| c == "SIGNAL NEWNYM"));

    // best-effort wrapper swallows the failure
    assert!(!rotate_best_effort(&client).await);
}

#[tokio::test]
async fn test_silent_port_times_out() {
    // accepts but never answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _hold = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let err = ControlClient::new(addr)
        .with_timeout(Duration::from_millis(200))
        .rotate_identity()
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn test_rotation_task_rotates_periodically() {
    let (addr, commands) = fake_control_port(None).await;
    let task = RotationTask::spawn(ControlClient::new(addr), Duration::from_millis(100));
    assert!(task.is_running());

    tokio::time::sleep(Duration::from_millis(450)).await;
    task.stop().await;

    let rotations = commands
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.as_str() == "SIGNAL NEWNYM")
        .count();
    assert!(rotations >= 2, "only {rotations} rotations");

    // nothing more after stop
    tokio::time::sleep(Duration::from_millis(250)).await;
    let after = commands
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.as_str() == "SIGNAL NEWNYM")
        .count();
    assert_eq!(after, rotations);
}

#[tokio::test]
async fn test_rotation_survives_unreachable_daemon() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let task = RotationTask::spawn(ControlClient::new(addr), Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(task.is_running());
    task.stop().await;
}
