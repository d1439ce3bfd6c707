// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sends marching orders to one or many panes with agent-specific Enter
//! quirks and staggered batch spacing (C6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ntm_core::canon::normalize_agent_type;
use ntm_core::governor::Governor;
use ntm_core::tm::PaneOps;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub const ENTER_DELAY: Duration = Duration::from_millis(100);
pub const DOUBLE_ENTER_DELAY: Duration = Duration::from_millis(500);
pub const STAGGER_DELAY: Duration = Duration::from_millis(300);

/// Agent types whose CLI occasionally swallows a single Enter after a paste.
fn needs_double_enter(agent_type: &str) -> bool {
    matches!(normalize_agent_type(agent_type).as_str(), "codex" | "gemini")
}

pub struct Injector<P: PaneOps> {
    pane_ops: Arc<P>,
    governor: Option<Arc<Governor>>,
    templates: RwLock<HashMap<String, String>>,
}

impl<P: PaneOps> Injector<P> {
    pub fn new(pane_ops: Arc<P>, governor: Option<Arc<Governor>>) -> Self {
        Self { pane_ops, governor, templates: RwLock::new(HashMap::new()) }
    }

    /// Register a named marching-orders template, e.g. `"default"` — the
    /// tier-3 fallback consulted when no per-agent or per-session override
    /// is set.
    pub async fn set_template(&self, key: &str, text: String) {
        self.templates.write().await.insert(key.to_owned(), text);
    }

    /// Look up a registered template by name.
    pub async fn get_template(&self, key: &str) -> Option<String> {
        self.templates.read().await.get(key).cloned()
    }

    /// Send `text` to a single pane: paste without Enter, wait, send Enter,
    /// and a second Enter for agents that need it.
    pub async fn inject(&self, target: &str, agent_type: &str, text: &str) -> anyhow::Result<()> {
        self.pane_ops.paste_keys(target, text).await?;
        tokio::time::sleep(ENTER_DELAY).await;
        self.pane_ops.send_keys(target, "", true).await?;

        if needs_double_enter(agent_type) {
            tokio::time::sleep(DOUBLE_ENTER_DELAY).await;
            self.pane_ops.send_keys(target, "", true).await?;
        }

        if let Some(ref governor) = self.governor {
            governor.record_success(&ntm_core::canon::provider_for_agent_type(agent_type)).await;
        }
        Ok(())
    }

    /// Inject the same text into a sequence of `(target, agent_type)` panes,
    /// staggering between them by the adaptive delay (if a governor is
    /// configured) or [`STAGGER_DELAY`]. Cancellable between panes and
    /// between the delay itself.
    pub async fn inject_batch(
        &self,
        panes: &[(String, String)],
        text: &str,
        cancel: &CancellationToken,
    ) -> Vec<anyhow::Result<()>> {
        let mut results = Vec::with_capacity(panes.len());
        for (index, (target, agent_type)) in panes.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            results.push(self.inject(target, agent_type, text).await);

            if index + 1 == panes.len() {
                continue;
            }
            let delay = match &self.governor {
                Some(governor) => governor.optimal_delay(agent_type).await,
                None => STAGGER_DELAY,
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        results
    }
}

#[cfg(test)]
#[path = "injector_tests.rs"]
mod tests;
