// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use ntm_core::model::DaemonSpec;
use tempfile::tempdir;

use super::*;

fn spec(name: &str, work_dir: &std::path::Path) -> DaemonSpec {
    DaemonSpec {
        name: name.to_owned(),
        command: "sleep".to_owned(),
        args: vec!["30".to_owned()],
        health_url: None,
        health_cmd: None,
        port_flag: None,
        default_port: 0,
        work_dir: work_dir.to_path_buf(),
        env: vec![],
    }
}

#[yare::parameterized(
    first_restart = { 1, Duration::from_secs(1) },
    second_restart = { 2, Duration::from_secs(2) },
    third_restart = { 3, Duration::from_secs(4) },
    caps_at_ceiling = { 7, Duration::from_secs(60) },
    never_exceeds_ceiling_even_far_out = { 30, Duration::from_secs(60) },
)]
fn restart_backoff_follows_doubling_law_with_ceiling(restarts: u32, expected: Duration) {
    assert_eq!(restart_backoff(restarts), expected);
}

#[test]
fn allocate_port_falls_back_to_ephemeral_when_default_taken() {
    let pinned = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let taken_port = pinned.local_addr().unwrap().port();
    let dir = tempdir().unwrap();
    let mut d = spec("x", dir.path());
    d.default_port = taken_port;
    let chosen = allocate_port(&d).unwrap();
    assert_ne!(chosen, 0);
    assert_ne!(chosen, taken_port, "must not reuse the already-bound port");
}

#[tokio::test]
async fn start_then_stop_transitions_state_and_removes_pid_file() {
    let dir = tempdir().unwrap();
    let supervisor = Supervisor::new("session-1", dir.path());
    supervisor.start(spec("echoer", dir.path())).await.unwrap();

    let daemon = supervisor.get_daemon("echoer").await.unwrap();
    assert_eq!(daemon.owner_id, "session-1");
    assert!(daemon.pid.is_some());

    let pid_path = dir.path().join("pids").join("echoer-session-1.pid");
    assert!(pid_path.exists());

    supervisor.stop("echoer").await.unwrap();
    assert!(!pid_path.exists());
    let daemon = supervisor.get_daemon("echoer").await.unwrap();
    assert_eq!(daemon.state, DaemonState::Stopped);
}

#[tokio::test]
async fn starting_same_name_twice_fails() {
    let dir = tempdir().unwrap();
    let supervisor = Supervisor::new("session-1", dir.path());
    supervisor.start(spec("dup", dir.path())).await.unwrap();
    let result = supervisor.start(spec("dup", dir.path())).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn stop_rejects_ownership_mismatch() {
    let dir = tempdir().unwrap();
    let supervisor = Supervisor::new("session-1", dir.path());
    supervisor.start(spec("owned", dir.path())).await.unwrap();
    {
        let mut daemons = supervisor.daemons.write().await;
        daemons.get_mut("owned").unwrap().owner_id = "other-session".to_owned();
    }
    let result = supervisor.stop("owned").await;
    assert!(result.is_err());
}
