// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use ntm_core::model::PaneSpec;

use super::*;

/// Always succeeds, ignoring args — stands in for a real tmux binary.
struct AlwaysSucceeds;

impl TmuxTransport for AlwaysSucceeds {
    fn command(&self) -> tokio::process::Command {
        tokio::process::Command::new("true")
    }
}

fn session_spec(name: &str, agent_type: &str, indices: &[u32]) -> SessionSpec {
    SessionSpec {
        name: name.to_owned(),
        agent_type: agent_type.to_owned(),
        panes: indices
            .iter()
            .map(|&index| PaneSpec { index, agent_type: agent_type.to_owned(), project_dir: None, launch_command: None })
            .collect(),
    }
}

#[test]
fn pane_target_and_title_follow_the_documented_format() {
    assert_eq!(pane_target("swarm1", 2), "swarm1:0.2");
    assert_eq!(pane_title("swarm1", "claude", 2), "swarm1:claude:2");
}

#[yare::parameterized(
    single_pane_has_zero_delta = { &[(80, 24)], 0 },
    uniform_panes_have_zero_delta = { &[(80, 24), (80, 24), (80, 24)], 0 },
    width_dominates = { &[(80, 24), (60, 24)], 20 },
    height_dominates = { &[(80, 24), (80, 10)], 14 },
)]
fn max_delta_reports_the_worst_dimension(geoms: &[(u32, u32)], expected: u32) {
    assert_eq!(max_delta(geoms), expected);
}

#[tokio::test]
async fn materialize_creates_and_splits_panes_without_erroring() {
    let orchestrator = Orchestrator::new(TmAdapter::new(AlwaysSucceeds));
    let plan = SwarmPlan { sessions: vec![session_spec("swarm1", "claude", &[0, 1, 2])] };
    orchestrator.materialize(&plan).await.unwrap();
}

#[tokio::test]
async fn create_session_rejects_duplicate_pane_indices() {
    let orchestrator = Orchestrator::new(TmAdapter::new(AlwaysSucceeds));
    let spec = session_spec("swarm1", "claude", &[0, 0]);
    let result = orchestrator.create_session(&spec).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn create_session_rejects_empty_pane_list() {
    let orchestrator = Orchestrator::new(TmAdapter::new(AlwaysSucceeds));
    let spec = session_spec("swarm1", "claude", &[]);
    let result = orchestrator.create_session(&spec).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn ensure_uniform_geometry_is_a_no_op_within_tolerance() {
    let orchestrator = Orchestrator::new(TmAdapter::new(AlwaysSucceeds));
    // `true` produces no stdout, so pane_geometry parses to an empty list and
    // max_delta is trivially 0 — well within any tolerance.
    let delta = orchestrator.ensure_uniform_geometry("swarm1", 5).await.unwrap();
    assert_eq!(delta, 0);
}
