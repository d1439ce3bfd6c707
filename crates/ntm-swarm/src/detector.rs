// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-pane polling loop that watches TM scrollback for provider rate-limit
//! signals (C5).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ntm_core::canon::normalize_agent_type;
use ntm_core::governor::{parse_wait_seconds, Governor};
use ntm_core::model::LimitEvent;
use ntm_core::tm::PaneOps;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const CAPTURE_LINES: u32 = 50;
pub const CHANNEL_CAPACITY: usize = 100;

/// Case-insensitive substrings indicating a rate-limit condition, keyed by
/// canonical agent type. `"default"` is the fallback set used for unknown
/// agent types.
fn patterns_for(agent_type: &str) -> &'static [&'static str] {
    match normalize_agent_type(agent_type).as_str() {
        "claude" => &["rate limit", "usage limit reached", "please try again later"],
        "codex" => &["rate limit exceeded", "you've hit your usage limit", "429"],
        "gemini" => &["resource exhausted", "quota exceeded"],
        _ => &["rate limit", "quota exceeded", "429", "try again later"],
    }
}

fn matches_limit(lowered: &str, agent_type: &str) -> Option<&'static str> {
    patterns_for(agent_type).iter().find(|p| lowered.contains(**p)).copied()
}

/// Watches pane scrollback and publishes [`LimitEvent`]s.
pub struct Detector<P: PaneOps> {
    pane_ops: Arc<P>,
    governor: Arc<Governor>,
    state_dir: PathBuf,
    tasks: RwLock<HashMap<String, CancellationToken>>,
    tx: mpsc::Sender<LimitEvent>,
}

impl<P: PaneOps + 'static> Detector<P> {
    /// `state_dir` is the session directory under which the governor persists
    /// `.ntm/rate_limits.json` after every recorded rate limit.
    pub fn new(
        pane_ops: Arc<P>,
        governor: Arc<Governor>,
        state_dir: impl Into<PathBuf>,
    ) -> (Arc<Self>, mpsc::Receiver<LimitEvent>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Arc::new(Self {
                pane_ops,
                governor,
                state_dir: state_dir.into(),
                tasks: RwLock::new(HashMap::new()),
                tx,
            }),
            rx,
        )
    }

    /// Start polling `target` for `agent_type`. A no-op if already monitored.
    pub async fn start_pane(self: &Arc<Self>, target: String, agent_type: String) {
        {
            let tasks = self.tasks.read().await;
            if tasks.contains_key(&target) {
                return;
            }
        }
        let cancel = CancellationToken::new();
        self.tasks.write().await.insert(target.clone(), cancel.clone());

        let detector = Arc::clone(self);
        tokio::spawn(async move {
            detector.poll_loop(target, agent_type, cancel).await;
        });
    }

    pub async fn stop_pane(&self, target: &str) {
        if let Some(cancel) = self.tasks.write().await.remove(target) {
            cancel.cancel();
        }
    }

    pub async fn stop(&self) {
        let mut tasks = self.tasks.write().await;
        for (_, cancel) in tasks.drain() {
            cancel.cancel();
        }
    }

    async fn poll_loop(self: Arc<Self>, target: String, agent_type: String, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let captured = match self.pane_ops.capture_pane(&target, CAPTURE_LINES).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(pane = %target, error = %e, "failed to capture pane during limit detection");
                    continue;
                }
            };

            let lowered = captured.to_lowercase();
            let Some(pattern) = matches_limit(&lowered, &agent_type) else { continue };

            let event = LimitEvent {
                session_pane: target.clone(),
                agent_type: agent_type.clone(),
                pattern: pattern.to_owned(),
                raw_output: captured.clone(),
                detected_at: SystemTime::now(),
            };

            let provider = ntm_core::canon::provider_for_agent_type(&agent_type);
            let wait_seconds = parse_wait_seconds(&captured);
            self.governor.record_rate_limit_with_cooldown(&provider, "swarm", wait_seconds).await;
            if let Err(e) = self.governor.save_to_dir(&self.state_dir).await {
                warn!(pane = %target, error = %e, "failed to persist governor state after rate limit");
            }

            if self.tx.try_send(event).is_err() {
                warn!(pane = %target, "limit event channel full, dropping event");
            }
        }
    }
}

#[cfg(test)]
#[path = "detector_tests.rs"]
mod tests;
