// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consumes [`LimitEvent`]s and drives kill -> rotate -> clear -> spawn ->
//! ready -> reinject (C8) — the core state machine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ntm_core::canon::normalize_agent_type;
use ntm_core::event_bus::EventBus;
use ntm_core::model::{LimitEvent, RespawnEvent, RetryState, RotationRecord};
use ntm_core::tm::PaneOps;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::warn;

use crate::rotator::Rotator;

pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const EXIT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const AGENT_READY_DELAY: Duration = Duration::from_secs(5);
pub const MAX_RETRIES_PER_PANE: u32 = 3;
pub const RETRY_RESET_DURATION: Duration = Duration::from_secs(3600);
const BUILTIN_FALLBACK: &str = "Please continue with the previously assigned task.";

fn ready_banners(agent_type: &str) -> &'static [&'static str] {
    match normalize_agent_type(agent_type).as_str() {
        "claude" => &["Claude"],
        "codex" => &["Codex"],
        "gemini" => &["Gemini"],
        _ => &[">"],
    }
}

/// True if the captured tail's last non-blank line looks like an idle shell prompt.
fn looks_like_shell_prompt(captured: &str) -> bool {
    captured
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| {
            let trimmed = l.trim_end();
            trimmed.ends_with('$') || trimmed.ends_with('#') || trimmed.ends_with('%')
        })
        .unwrap_or(false)
}

/// `kill -9 -<pgid>` then `kill -9 <pid>` — the documented fallback order.
fn force_kill(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(-(pid as i32)), Signal::SIGKILL);
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

type ForceKill = Arc<dyn Fn(u32) + Send + Sync>;

pub struct Respawner<P: PaneOps> {
    pane_ops: Arc<P>,
    injector: Arc<crate::injector::Injector<P>>,
    rotator: Option<Arc<Rotator>>,
    event_bus: Option<Arc<EventBus>>,
    retries: RwLock<HashMap<String, RetryState>>,
    marching_orders: RwLock<HashMap<String, String>>,
    launch_commands: RwLock<HashMap<String, String>>,
    project_dirs: RwLock<HashMap<String, PathBuf>>,
    pane_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    force_kill: ForceKill,
}

impl<P: PaneOps + 'static> Respawner<P> {
    pub fn new(
        pane_ops: Arc<P>,
        injector: Arc<crate::injector::Injector<P>>,
        rotator: Option<Arc<Rotator>>,
        event_bus: Option<Arc<EventBus>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pane_ops,
            injector,
            rotator,
            event_bus,
            retries: RwLock::new(HashMap::new()),
            marching_orders: RwLock::new(HashMap::new()),
            launch_commands: RwLock::new(HashMap::new()),
            project_dirs: RwLock::new(HashMap::new()),
            pane_locks: RwLock::new(HashMap::new()),
            force_kill: Arc::new(force_kill),
        })
    }

    /// Override the force-kill capability, e.g. to assert on invocation in tests.
    #[cfg(test)]
    pub(crate) fn with_force_kill(mut self: Arc<Self>, f: ForceKill) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("no other references yet").force_kill = f;
        self
    }

    pub async fn set_launch_command(&self, agent_type: &str, command: String) {
        self.launch_commands.write().await.insert(normalize_agent_type(agent_type), command);
    }

    pub async fn set_marching_orders(&self, key: &str, template: String) {
        self.marching_orders.write().await.insert(key.to_owned(), template);
    }

    pub async fn set_project_dir(&self, session_pane: &str, dir: PathBuf) {
        self.project_dirs.write().await.insert(session_pane.to_owned(), dir);
    }

    /// Drains `rx`, spawning one respawn task per event. Different panes
    /// respawn concurrently; a given pane is serialized via its own lock.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<LimitEvent>) {
        while let Some(event) = rx.recv().await {
            let respawner = Arc::clone(&self);
            tokio::spawn(async move { respawner.handle_event(event).await });
        }
    }

    async fn pane_lock(&self, pane: &str) -> Arc<Mutex<()>> {
        let mut locks = self.pane_locks.write().await;
        Arc::clone(locks.entry(pane.to_owned()).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    async fn consume_retry_budget(&self, pane: &str) -> bool {
        let mut retries = self.retries.write().await;
        let state = retries.entry(pane.to_owned()).or_default();
        if let Some(last_reset) = state.last_reset {
            if SystemTime::now().duration_since(last_reset).unwrap_or_default() > RETRY_RESET_DURATION {
                state.count = 0;
                state.last_reset = None;
            }
        }
        state.count < MAX_RETRIES_PER_PANE
    }

    async fn bump_retry(&self, pane: &str) {
        let mut retries = self.retries.write().await;
        let state = retries.entry(pane.to_owned()).or_default();
        if state.last_reset.is_none() {
            state.last_reset = Some(SystemTime::now());
        }
        state.count += 1;
    }

    async fn graceful_kill(&self, target: &str, agent_type: &str) -> anyhow::Result<()> {
        match agent_type {
            "claude" => {
                self.pane_ops.send_keys(target, "C-c", false).await?;
                tokio::time::sleep(Duration::from_millis(100)).await;
                self.pane_ops.send_keys(target, "C-c", false).await?;
            }
            "codex" => {
                self.pane_ops.send_keys(target, "/exit", true).await?;
            }
            "gemini" => {
                self.pane_ops.send_keys(target, "Escape", false).await?;
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.pane_ops.send_keys(target, "C-c", false).await?;
            }
            _ => {
                self.pane_ops.send_keys(target, "C-c", false).await?;
                self.pane_ops.send_keys(target, "C-c", false).await?;
            }
        }
        Ok(())
    }

    async fn verify_exit_or_force_kill(&self, target: &str) {
        let deadline = tokio::time::Instant::now() + EXIT_WAIT_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if let Ok(captured) = self.pane_ops.capture_pane(target, 5).await {
                if looks_like_shell_prompt(&captured) {
                    return;
                }
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
        if let Ok(pid) = self.pane_ops.pane_pid(target).await {
            (self.force_kill)(pid);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    async fn wait_for_ready(&self, target: &str, agent_type: &str) -> bool {
        let deadline = tokio::time::Instant::now() + AGENT_READY_DELAY;
        let banners = ready_banners(agent_type);
        while tokio::time::Instant::now() < deadline {
            if let Ok(captured) = self.pane_ops.capture_pane(target, 10).await {
                if banners.iter().any(|b| captured.contains(b)) {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        false
    }

    async fn resolve_marching_orders(&self, agent_type: &str) -> (String, &'static str) {
        let orders = self.marching_orders.read().await;
        if let Some(t) = orders.get(agent_type) {
            return (t.clone(), "marching_orders");
        }
        if let Some(t) = orders.get("default") {
            return (t.clone(), "marching_orders_default");
        }
        drop(orders);
        if let Some(t) = self.injector.get_template("default").await {
            return (t, "injector_default_template");
        }
        (BUILTIN_FALLBACK.to_owned(), "builtin_fallback")
    }

    async fn emit(&self, event: &RespawnEvent) {
        if let Some(ref bus) = self.event_bus {
            bus.publish("agent.restarted", serde_json::json!(event)).await;
        }
    }

    async fn handle_event(self: Arc<Self>, event: LimitEvent) {
        let lock = self.pane_lock(&event.session_pane).await;
        let _guard = lock.lock().await;

        // Step 0.
        if !self.consume_retry_budget(&event.session_pane).await {
            warn!(pane = %event.session_pane, "retry budget exhausted, dropping limit event");
            return;
        }

        let agent_type = normalize_agent_type(&event.agent_type);

        // Step 1 / 1b.
        if let Err(e) = self.graceful_kill(&event.session_pane, &agent_type).await {
            warn!(pane = %event.session_pane, error = %e, "graceful kill failed, verifying exit anyway");
        }
        self.verify_exit_or_force_kill(&event.session_pane).await;

        // Step 2.
        let rotated = match &self.rotator {
            Some(rotator) => rotator.on_limit_hit(&event).await,
            None => None,
        };

        // Step 3.
        if let Err(e) = self.pane_ops.send_keys(&event.session_pane, "clear", true).await {
            warn!(pane = %event.session_pane, error = %e, "failed to clear terminal");
        }

        // Step 4.
        if let Some(dir) = self.project_dirs.read().await.get(&event.session_pane).cloned() {
            let cmd = format!("cd {}", dir.display());
            if let Err(e) = self.pane_ops.send_keys(&event.session_pane, &cmd, true).await {
                warn!(pane = %event.session_pane, error = %e, "failed to cd into project dir");
            }
        }

        // Step 5 — fatal.
        let launch_command = self.launch_commands.read().await.get(&agent_type).cloned();
        let launch_result = match launch_command {
            Some(cmd) => self.pane_ops.send_keys(&event.session_pane, &cmd, true).await,
            None => Err(anyhow::anyhow!("no launch command configured for agent type {agent_type}")),
        };
        if let Err(e) = launch_result {
            let respawn_event = RespawnEvent {
                session_pane: event.session_pane.clone(),
                agent_type: agent_type.clone(),
                rotated,
                marching_orders_source: "none".to_owned(),
                succeeded: false,
                error: Some(e.to_string()),
            };
            self.emit(&respawn_event).await;
            self.bump_retry(&event.session_pane).await;
            return;
        }

        // Step 6.
        self.wait_for_ready(&event.session_pane, &agent_type).await;

        // Step 7.
        let (text, source) = self.resolve_marching_orders(&agent_type).await;
        let inject_result = self.injector.inject(&event.session_pane, &agent_type, &text).await;

        // Step 8.
        let respawn_event = RespawnEvent {
            session_pane: event.session_pane.clone(),
            agent_type,
            rotated,
            marching_orders_source: source.to_owned(),
            succeeded: inject_result.is_ok(),
            error: inject_result.err().map(|e| e.to_string()),
        };
        self.emit(&respawn_event).await;
        self.bump_retry(&event.session_pane).await;
    }
}

#[cfg(test)]
#[path = "respawner_tests.rs"]
mod tests;
