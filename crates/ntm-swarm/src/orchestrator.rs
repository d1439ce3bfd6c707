// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materializes a [`SwarmPlan`] into TM sessions/panes and keeps their
//! tiled geometry balanced (C10).

use std::path::PathBuf;

use ntm_core::model::{SessionSpec, SwarmPlan};
use ntm_core::tm::{TmAdapter, TmuxTransport};
use ntm_core::ErrorKind;

fn pane_target(session: &str, pane_index: u32) -> String {
    format!("{session}:0.{pane_index}")
}

fn pane_title(session: &str, agent_type: &str, index: u32) -> String {
    format!("{session}:{agent_type}:{index}")
}

/// Max delta across all panes' width and height, in cells. Zero for 0 or 1 panes.
fn max_delta(geoms: &[(u32, u32)]) -> u32 {
    if geoms.len() < 2 {
        return 0;
    }
    let (mut min_w, mut max_w) = (u32::MAX, 0);
    let (mut min_h, mut max_h) = (u32::MAX, 0);
    for &(w, h) in geoms {
        min_w = min_w.min(w);
        max_w = max_w.max(w);
        min_h = min_h.min(h);
        max_h = max_h.max(h);
    }
    (max_w - min_w).max(max_h - min_h)
}

pub struct Orchestrator<T: TmuxTransport> {
    tm: TmAdapter<T>,
}

impl<T: TmuxTransport> Orchestrator<T> {
    pub fn new(tm: TmAdapter<T>) -> Self {
        Self { tm }
    }

    pub async fn materialize(&self, plan: &SwarmPlan) -> anyhow::Result<()> {
        plan.validate()?;
        for session in &plan.sessions {
            self.create_session(session).await?;
        }
        Ok(())
    }

    pub async fn create_session(&self, spec: &SessionSpec) -> anyhow::Result<()> {
        spec.validate()?;
        let mut panes = spec.panes.clone();
        panes.sort_by_key(|p| p.index);
        let Some(first) = panes.first() else {
            return Err(anyhow::anyhow!("session {} has no panes", spec.name)
                .context(ErrorKind::InputValidation));
        };

        let first_dir = first.project_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        self.tm.create_session(&spec.name, &first_dir).await?;
        self.tm
            .set_title(&pane_target(&spec.name, first.index), &pane_title(&spec.name, &spec.agent_type, first.index))
            .await?;

        for pane in panes.iter().skip(1) {
            self.tm.split_window(&spec.name, pane.project_dir.as_deref()).await?;
            self.tm
                .set_title(
                    &pane_target(&spec.name, pane.index),
                    &pane_title(&spec.name, &spec.agent_type, pane.index),
                )
                .await?;
        }

        self.tm.select_layout_tiled(&spec.name).await?;
        Ok(())
    }

    pub async fn verify_geometry(&self, session: &str) -> anyhow::Result<u32> {
        let geoms = self.tm.pane_geometry(session).await?;
        Ok(max_delta(&geoms))
    }

    /// Rebalance via a fresh tiled layout if geometry delta exceeds `tolerance`.
    pub async fn ensure_uniform_geometry(&self, session: &str, tolerance: u32) -> anyhow::Result<u32> {
        let delta = self.verify_geometry(session).await?;
        if delta <= tolerance {
            return Ok(delta);
        }
        self.tm.select_layout_tiled(session).await?;
        self.verify_geometry(session).await
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
