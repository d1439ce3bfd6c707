// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Swarm control loop for heterogeneous AI coding agents in a terminal multiplexer.
#[derive(Debug, Parser)]
#[command(name = "ntm", version, about)]
pub struct Config {
    /// Identifier for this swarm run. Defaults to a random id if omitted.
    #[arg(long, env = "NTM_SESSION_ID")]
    pub session_id: Option<String>,

    /// Directory for pid files, logs, and other per-session state.
    #[arg(long, env = "NTM_SESSION_DIR", default_value = "./.ntm")]
    pub session_dir: PathBuf,

    /// Path to a swarm plan JSON file describing sessions and panes to create.
    #[arg(long, env = "NTM_PLAN")]
    pub plan: Option<PathBuf>,

    /// SSH destination to run tmux against a remote host instead of locally.
    #[arg(long, env = "NTM_REMOTE")]
    pub remote: Option<String>,

    /// Whether account rotation respects an active provider cooldown.
    #[arg(long, env = "NTM_ROTATION_RESPECTS_COOLDOWN", action = clap::ArgAction::Set, default_value_t = true)]
    pub rotation_respects_cooldown: bool,

    /// Log format: "json" or "text".
    #[arg(long, env = "NTM_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "NTM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        if let Some(ref plan) = self.plan {
            if !plan.exists() {
                anyhow::bail!("plan file does not exist: {}", plan.display());
            }
        }
        Ok(())
    }

    pub fn effective_session_id(&self) -> String {
        self.session_id.clone().unwrap_or_else(|| format!("ntm-{}", uuid::Uuid::new_v4().simple()))
    }
}
