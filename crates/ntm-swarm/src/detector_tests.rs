// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ntm_core::tm::BoxFuture;
use tempfile::tempdir;
use tokio::sync::Mutex;

use super::*;

/// A mock pane that returns a fixed script of captures, one per call.
struct ScriptedPane {
    captures: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedPane {
    fn new(captures: Vec<&str>) -> Self {
        Self {
            captures: Mutex::new(captures.into_iter().map(str::to_owned).rev().collect()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl PaneOps for ScriptedPane {
    fn capture_pane(&self, _target: &str, _lines: u32) -> BoxFuture<'_, anyhow::Result<String>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let mut captures = self.captures.lock().await;
            Ok(captures.pop().unwrap_or_default())
        })
    }

    fn send_keys(&self, _target: &str, _keys: &str, _enter: bool) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn paste_keys(&self, _target: &str, _text: &str) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn pane_pid(&self, _target: &str) -> BoxFuture<'_, anyhow::Result<u32>> {
        Box::pin(async { Ok(1234) })
    }
}

#[tokio::test]
async fn publishes_limit_event_on_pattern_match_and_updates_governor() {
    let pane = Arc::new(ScriptedPane::new(vec![
        "everything is fine",
        "Error: rate limit exceeded, try again in 30 seconds",
    ]));
    let governor = Arc::new(Governor::new());
    let dir = tempdir().unwrap();
    let (detector, mut rx) = Detector::new(Arc::clone(&pane), Arc::clone(&governor), dir.path());

    detector.start_pane("s:0.0".to_owned(), "codex".to_owned()).await;

    let event = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.session_pane, "s:0.0");
    assert_eq!(event.agent_type, "codex");

    let cooldown = governor.cooldown_remaining("openai").await;
    assert!(cooldown > Duration::ZERO, "governor should have recorded a cooldown");

    let persisted = dir.path().join(".ntm").join("rate_limits.json");
    assert!(persisted.exists(), "governor state should be persisted after a recorded limit");

    detector.stop().await;
}

#[tokio::test]
async fn start_pane_on_already_monitored_target_is_a_no_op() {
    let pane = Arc::new(ScriptedPane::new(vec!["nothing interesting"]));
    let governor = Arc::new(Governor::new());
    let dir = tempdir().unwrap();
    let (detector, _rx) = Detector::new(pane, governor, dir.path());

    detector.start_pane("s:0.0".to_owned(), "claude".to_owned()).await;
    detector.start_pane("s:0.0".to_owned(), "claude".to_owned()).await;

    assert_eq!(detector.tasks.read().await.len(), 1);
    detector.stop().await;
}

#[test]
fn pattern_match_is_case_insensitive_and_falls_back_to_generic_set() {
    assert!(matches_limit("RATE LIMIT EXCEEDED", "codex").is_some());
    assert!(matches_limit("nothing to see here", "unknown-agent").is_none());
    assert!(matches_limit("quota exceeded for this account", "unknown-agent").is_some());
}
