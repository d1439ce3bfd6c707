// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared data model. See the component modules for the operations each
//! owner exposes over its slice of this model.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

// -- Swarm plan ---------------------------------------------------------------

/// A single pane within a [`SessionSpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneSpec {
    /// Position within the session. Unique within its session.
    pub index: u32,
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_command: Option<String>,
}

/// A named TM session containing an ordered set of panes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSpec {
    pub name: String,
    pub agent_type: String,
    pub panes: Vec<PaneSpec>,
}

impl SessionSpec {
    /// Validate the pane-index-uniqueness invariant.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = BTreeSet::new();
        for pane in &self.panes {
            if !seen.insert(pane.index) {
                return Err(anyhow::anyhow!(
                    "duplicate pane index {} in session {}",
                    pane.index,
                    self.name
                )
                .context(crate::error::ErrorKind::InputValidation));
            }
        }
        Ok(())
    }
}

/// Built once per `ntm spawn`, consumed by the orchestrator, retained for the run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SwarmPlan {
    pub sessions: Vec<SessionSpec>,
}

impl SwarmPlan {
    pub fn validate(&self) -> anyhow::Result<()> {
        for session in &self.sessions {
            session.validate()?;
        }
        Ok(())
    }
}

// -- Daemon supervisor ----------------------------------------------------------

/// Declarative spec for a supervised side-car process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_flag: Option<String>,
    pub default_port: u16,
    pub work_dir: PathBuf,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

/// Lifecycle state of a [`ManagedDaemon`]. Transitions are monotone except
/// `Failed -> Restarting -> Starting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Restarting,
}

/// A daemon tracked by the supervisor. At most one exists per `(owner, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedDaemon {
    pub spec: DaemonSpec,
    pub state: DaemonState,
    pub pid: Option<u32>,
    pub port: u16,
    pub started_at: SystemTime,
    pub last_health: Option<SystemTime>,
    pub restarts: u32,
    pub owner_id: String,
}

/// Schema written to `<session-dir>/pids/<name>-<session>.pid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidFile {
    pub pid: u32,
    pub port: u16,
    pub owner_id: String,
    pub command: String,
    pub started_at: String,
}

// -- Rate-limit governor ---------------------------------------------------------

/// Per-provider adaptive delay/cooldown state. Provider is canonicalized
/// (see [`crate::canon`]) before use as a key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderState {
    pub current_delay: Duration,
    pub consecutive_success: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rate_limit: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<SystemTime>,
    pub total_rate_limits: u64,
    pub total_successes: u64,
}

/// One entry in a provider's rate-limit history ring, truncated to the last 100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitEvent {
    pub at: SystemTime,
    pub wait: Duration,
}

// -- Limit detector / respawner ---------------------------------------------------

/// Emitted by the Limit Detector when pane output matches a provider pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitEvent {
    /// `"session:window.pane"`.
    pub session_pane: String,
    pub agent_type: String,
    /// The literal substring that matched.
    pub pattern: String,
    /// Captured tail of pane output.
    pub raw_output: String,
    pub detected_at: SystemTime,
}

/// Per-pane respawn retry budget. `count` is logically zero once the window
/// since `last_reset` exceeds the configured reset duration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryState {
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reset: Option<SystemTime>,
}

/// Outcome of an [`crate::event_bus`]-published respawn attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespawnEvent {
    pub session_pane: String,
    pub agent_type: String,
    pub rotated: Option<RotationRecord>,
    pub marching_orders_source: String,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of `OnLimitHit` on the Account Rotator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationRecord {
    pub provider: String,
    pub from_account: Option<String>,
    pub to_account: Option<String>,
    pub rotated_at: SystemTime,
    pub session_pane: String,
    pub triggered_by: String,
}

// -- Approval engine -------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

/// A two-person-rule gate on a destructive operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    /// `appr-YYYYMMDD-HHMMSS-<16 hex>`.
    pub id: String,
    pub action: String,
    pub resource: String,
    pub reason: String,
    pub requested_by: String,
    pub correlation_id: String,
    pub requires_slb: bool,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_reason: Option<String>,
}

// -- Profile matcher --------------------------------------------------------------

/// Ordered glob-match preferences for an [`AgentProfile`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPreferences {
    pub preferred_files: Vec<String>,
    pub avoid_files: Vec<String>,
    pub preferred_labels: Vec<String>,
}

/// Rolling performance metrics for an [`AgentProfile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub success_rate: f64,
    pub avg_completion_time: Duration,
    pub tasks_completed: u64,
    pub last_updated: SystemTime,
}

/// A scoreable agent configuration. Stored copy-on-read to prevent external mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_type: String,
    pub model: String,
    pub context_budget: u64,
    pub specializations: BTreeSet<String>,
    pub preferences: AgentPreferences,
    pub performance: AgentPerformance,
}

/// A task to be scored against an [`AgentProfile`] by the Profile Matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub title: String,
    pub task_type: String,
    pub affected_files: Vec<String>,
    pub labels: Vec<String>,
    pub estimated_tokens: u64,
}

// -- Support bundle manifest ------------------------------------------------------

/// Host identity recorded in a [`Manifest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub os: String,
    pub arch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// One entry in a [`Manifest`]'s file list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: String,
    /// Lowercase hex, exactly 64 characters.
    pub sha256: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// The only schema version NTM currently accepts in [`Manifest::validate`].
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Describes the contents of a support bundle (`manifest.json` inside a
/// `.zip`/`.tar.gz`). NTM validates manifests handed to it by the bundle
/// generator; it does not generate bundles itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub generated_at: SystemTime,
    pub ntm_version: String,
    pub host: HostInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    pub files: Vec<ManifestFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redaction_summary: Option<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl Manifest {
    /// `schema_version ∈ [1,1]`; every `sha256` is exactly 64 hex chars;
    /// `size_bytes` is always valid (unsigned); file paths are unique.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.schema_version != MANIFEST_SCHEMA_VERSION {
            return Err(anyhow::anyhow!("unsupported manifest schema_version {}", self.schema_version)
                .context(crate::error::ErrorKind::InputValidation));
        }

        let mut seen = BTreeSet::new();
        for file in &self.files {
            if file.sha256.len() != 64 || !file.sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(anyhow::anyhow!("manifest file {} has a malformed sha256", file.path)
                    .context(crate::error::ErrorKind::InputValidation));
            }
            if !seen.insert(file.path.as_str()) {
                return Err(anyhow::anyhow!("duplicate manifest file path {}", file.path)
                    .context(crate::error::ErrorKind::InputValidation));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
