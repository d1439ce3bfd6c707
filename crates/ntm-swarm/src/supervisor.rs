// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervises named side-car daemons: port allocation, PID files, health
//! probes, exponential-backoff restart (C4).

use std::collections::HashMap;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ntm_core::ErrorKind;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ntm_core::model::{DaemonSpec, DaemonState, ManagedDaemon, PidFile};

pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub const HEALTH_WARMUP_DELAY: Duration = Duration::from_secs(2);
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);
pub const RESTART_BACKOFF_MAX: Duration = Duration::from_secs(60);
pub const MAX_RESTARTS: u32 = 5;
pub const LOG_ROTATE_CAP_BYTES: u64 = 10 * 1024 * 1024;

/// Backoff before the Nth restart attempt: `min(2^(restarts-1) * 1s, 60s)`.
pub fn restart_backoff(restarts: u32) -> Duration {
    let secs = 1u64.saturating_shl(restarts.saturating_sub(1).min(62));
    Duration::from_secs(secs).min(RESTART_BACKOFF_MAX)
}

/// Pick `spec.default_port` if free, else an OS-assigned ephemeral loopback port.
pub fn allocate_port(spec: &DaemonSpec) -> anyhow::Result<u16> {
    if TcpListener::bind(("127.0.0.1", spec.default_port)).is_ok() {
        return Ok(spec.default_port);
    }
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .map_err(|e| anyhow::Error::new(e).context(ErrorKind::ResourceExhaustion))?;
    Ok(listener.local_addr()?.port())
}

fn pid_file_path(session_dir: &Path, name: &str, session: &str) -> PathBuf {
    session_dir.join("pids").join(format!("{name}-{session}.pid"))
}

fn log_file_path(session_dir: &Path, name: &str) -> PathBuf {
    session_dir.join("logs").join(format!("{name}.log"))
}

/// Rotate `path` to `path.1` if it has grown past [`LOG_ROTATE_CAP_BYTES`].
async fn rotate_log_if_needed(path: &Path) -> anyhow::Result<()> {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return Ok(());
    };
    if meta.len() <= LOG_ROTATE_CAP_BYTES {
        return Ok(());
    }
    let backup = path.with_extension("log.1");
    tokio::fs::rename(path, &backup).await?;
    Ok(())
}

/// Supervises a session's worth of named daemons.
pub struct Supervisor {
    session_id: String,
    session_dir: PathBuf,
    daemons: RwLock<HashMap<String, ManagedDaemon>>,
    cancels: RwLock<HashMap<String, CancellationToken>>,
}

impl Supervisor {
    pub fn new(session_id: impl Into<String>, session_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            session_id: session_id.into(),
            session_dir: session_dir.into(),
            daemons: RwLock::new(HashMap::new()),
            cancels: RwLock::new(HashMap::new()),
        })
    }

    pub async fn status(&self) -> HashMap<String, ManagedDaemon> {
        self.daemons.read().await.clone()
    }

    pub async fn get_daemon(&self, name: &str) -> Option<ManagedDaemon> {
        self.daemons.read().await.get(name).cloned()
    }

    /// Launch `spec` as a new managed daemon. Fails if a daemon with the same
    /// name already exists for this supervisor.
    pub async fn start(self: &Arc<Self>, spec: DaemonSpec) -> anyhow::Result<()> {
        {
            let daemons = self.daemons.read().await;
            if daemons.contains_key(&spec.name) {
                return Err(anyhow::anyhow!("daemon {} already started", spec.name)
                    .context(ErrorKind::PreconditionViolation));
            }
        }
        let restarts = 0;
        self.start_inner(spec, restarts).await
    }

    async fn start_inner(self: &Arc<Self>, mut spec: DaemonSpec, restarts: u32) -> anyhow::Result<()> {
        let port = allocate_port(&spec)?;
        if let Some(ref flag) = spec.port_flag {
            spec.args.push(flag.clone());
            spec.args.push(port.to_string());
        }

        let log_path = log_file_path(&self.session_dir, &spec.name);
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        rotate_log_if_needed(&log_path).await.ok();
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .map_err(|e| anyhow::Error::new(e).context(ErrorKind::TransientIO))?;
        let log_std = log_file.into_std().await;

        let mut command = Command::new(&spec.command);
        command.args(&spec.args).current_dir(&spec.work_dir);
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        command.stdout(log_std.try_clone().map_err(|e| anyhow::Error::new(e).context(ErrorKind::TransientIO))?);
        command.stderr(log_std);
        // Own process group so Stop can signal the whole tree.
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| anyhow::Error::new(e).context(ErrorKind::TransientIO))?;
        let pid = child.id().ok_or_else(|| {
            anyhow::anyhow!("daemon {} exited immediately after spawn", spec.name)
                .context(ErrorKind::TransientIO)
        })?;

        let pid_file = PidFile {
            pid,
            port,
            owner_id: self.session_id.clone(),
            command: spec.command.clone(),
            started_at: rfc3339_now(),
        };
        let pid_path = pid_file_path(&self.session_dir, &spec.name, &self.session_id);
        if let Some(parent) = pid_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Ok(json) = serde_json::to_vec_pretty(&pid_file) {
            if let Err(e) = tokio::fs::write(&pid_path, json).await {
                warn!(daemon = %spec.name, error = %e, "failed to write pid file, continuing");
            }
        }

        let daemon = ManagedDaemon {
            spec: spec.clone(),
            state: DaemonState::Starting,
            pid: Some(pid),
            port,
            started_at: SystemTime::now(),
            last_health: None,
            restarts,
            owner_id: self.session_id.clone(),
        };
        self.daemons.write().await.insert(spec.name.clone(), daemon);

        let cancel = CancellationToken::new();
        self.cancels.write().await.insert(spec.name.clone(), cancel.clone());

        let supervisor = Arc::clone(self);
        let name = spec.name.clone();
        tokio::spawn(async move {
            supervisor.run_health_loop(name.clone(), cancel.clone()).await;
        });

        let supervisor = Arc::clone(self);
        let name = spec.name.clone();
        tokio::spawn(async move {
            let exit = child.wait().await;
            supervisor.handle_exit(name, exit).await;
        });

        Ok(())
    }

    async fn run_health_loop(self: Arc<Self>, name: String, cancel: CancellationToken) {
        tokio::time::sleep(HEALTH_WARMUP_DELAY).await;
        let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let Some(daemon) = self.daemons.read().await.get(&name).cloned() else { break };
            if matches!(daemon.state, DaemonState::Stopping | DaemonState::Stopped) {
                break;
            }
            let healthy = self.probe_health(&daemon).await;
            let mut daemons = self.daemons.write().await;
            if let Some(d) = daemons.get_mut(&name) {
                if healthy {
                    d.last_health = Some(SystemTime::now());
                    if matches!(d.state, DaemonState::Starting) {
                        d.state = DaemonState::Running;
                    }
                }
                // A failed probe alone never flips Running -> Failed.
            }
        }
    }

    async fn probe_health(&self, daemon: &ManagedDaemon) -> bool {
        if let Some(ref url) = daemon.spec.health_url {
            let url = url.replace("{port}", &daemon.port.to_string());
            let client = reqwest_health_client();
            return tokio::time::timeout(HEALTH_TIMEOUT, client.get(&url).send())
                .await
                .ok()
                .and_then(|r| r.ok())
                .is_some_and(|r| r.status().is_success());
        }
        if let Some(ref cmd) = daemon.spec.health_cmd {
            let mut parts = cmd.split_whitespace();
            let Some(program) = parts.next() else { return false };
            let result = tokio::time::timeout(
                HEALTH_TIMEOUT,
                Command::new(program).args(parts).status(),
            )
            .await;
            return matches!(result, Ok(Ok(status)) if status.success());
        }
        // Liveness only: the exit-watcher flips state on actual exit.
        true
    }

    async fn handle_exit(self: Arc<Self>, name: String, _exit: std::io::Result<std::process::ExitStatus>) {
        let should_restart = {
            let mut daemons = self.daemons.write().await;
            let Some(daemon) = daemons.get_mut(&name) else { return };
            if matches!(daemon.state, DaemonState::Stopping | DaemonState::Stopped) {
                return;
            }
            daemon.restarts += 1;
            daemon.state = DaemonState::Failed;
            daemon.restarts <= MAX_RESTARTS
        };

        if !should_restart {
            warn!(daemon = %name, "abandoning daemon after exceeding max restarts");
            return;
        }

        let Some((spec, restarts)) = ({
            let mut daemons = self.daemons.write().await;
            daemons.get_mut(&name).map(|daemon| {
                daemon.state = DaemonState::Restarting;
                (daemon.spec.clone(), daemon.restarts)
            })
        }) else {
            // Daemon was removed (e.g. stopped) between the check above and here.
            return;
        };

        let backoff = restart_backoff(restarts);
        info!(daemon = %name, restarts, backoff_secs = backoff.as_secs(), "scheduling restart");
        tokio::time::sleep(backoff).await;

        self.daemons.write().await.remove(&name);
        if let Err(e) = self.start_inner(spec, restarts).await {
            warn!(daemon = %name, error = %e, "restart attempt failed");
        }
    }

    /// Stop a single daemon. Refuses cross-session ownership.
    pub async fn stop(&self, name: &str) -> anyhow::Result<()> {
        let owner_ok = {
            let daemons = self.daemons.read().await;
            match daemons.get(name) {
                Some(d) if d.owner_id == self.session_id => true,
                Some(_) => {
                    return Err(anyhow::anyhow!("ownership mismatch stopping daemon {name}")
                        .context(ErrorKind::PreconditionViolation))
                }
                None => {
                    return Err(anyhow::anyhow!("no such daemon: {name}")
                        .context(ErrorKind::InputValidation))
                }
            }
        };
        if !owner_ok {
            unreachable!();
        }

        if let Some(cancel) = self.cancels.write().await.remove(name) {
            cancel.cancel();
        }

        let pid = {
            let mut daemons = self.daemons.write().await;
            match daemons.get_mut(name) {
                Some(daemon) => {
                    daemon.state = DaemonState::Stopping;
                    daemon.pid
                }
                None => {
                    return Err(anyhow::anyhow!("no such daemon: {name}")
                        .context(ErrorKind::InputValidation))
                }
            }
        };

        if let Some(pid) = pid {
            kill_process_group_then_pid(pid);
        }

        let mut daemons = self.daemons.write().await;
        if let Some(daemon) = daemons.get_mut(name) {
            daemon.state = DaemonState::Stopped;
            daemon.pid = None;
        }
        let pid_path = pid_file_path(&self.session_dir, name, &self.session_id);
        let _ = tokio::fs::remove_file(&pid_path).await;
        Ok(())
    }

    pub async fn stop_all(&self) -> anyhow::Result<()> {
        let names: Vec<String> = self.daemons.read().await.keys().cloned().collect();
        for name in names {
            let _ = self.stop(&name).await;
        }
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.stop_all().await
    }
}

fn reqwest_health_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HEALTH_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// `kill -<pgid>` (SIGKILL to the group), then `kill <pid>` as a fallback if
/// the group signal didn't land (e.g. the child detached from its group).
fn kill_process_group_then_pid(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(-(pid as i32)), Signal::SIGKILL);
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

/// Current UTC time as an RFC3339 timestamp, e.g. `2026-07-27T10:04:32Z`.
fn rfc3339_now() -> String {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let (y, mo, d, h, mi, s) = crate::approval::civil_from_unix_secs(secs);
    format!("{y:04}-{mo:02}-{d:02}T{h:02}:{mi:02}:{s:02}Z")
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
