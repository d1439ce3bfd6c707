// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use ntm_core::tm::BoxFuture;
use tokio::sync::Mutex;

use super::*;

#[derive(Default)]
struct RecordingPane {
    calls: Mutex<Vec<String>>,
}

impl PaneOps for RecordingPane {
    fn capture_pane(&self, _target: &str, _lines: u32) -> BoxFuture<'_, anyhow::Result<String>> {
        Box::pin(async { Ok(String::new()) })
    }

    fn send_keys(&self, target: &str, _keys: &str, enter: bool) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.calls.lock().await.push(format!("send_keys:{target}:{enter}"));
            Ok(())
        })
    }

    fn paste_keys(&self, target: &str, _text: &str) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.calls.lock().await.push(format!("paste_keys:{target}"));
            Ok(())
        })
    }

    fn pane_pid(&self, _target: &str) -> BoxFuture<'_, anyhow::Result<u32>> {
        Box::pin(async { Ok(1) })
    }
}

#[tokio::test]
async fn claude_gets_a_single_enter() {
    let pane = Arc::new(RecordingPane::default());
    let injector = Injector::new(Arc::clone(&pane), None);
    injector.inject("s:0.0", "claude", "hello").await.unwrap();

    let calls = pane.calls.lock().await;
    assert_eq!(calls.as_slice(), ["paste_keys:s:0.0", "send_keys:s:0.0:true"]);
}

#[tokio::test]
async fn codex_gets_a_second_enter() {
    let pane = Arc::new(RecordingPane::default());
    let injector = Injector::new(Arc::clone(&pane), None);
    injector.inject("s:0.0", "codex", "hello").await.unwrap();

    let calls = pane.calls.lock().await;
    assert_eq!(
        calls.as_slice(),
        ["paste_keys:s:0.0", "send_keys:s:0.0:true", "send_keys:s:0.0:true"]
    );
}

#[tokio::test]
async fn successful_injection_counts_toward_the_governors_shrink_threshold() {
    let pane = Arc::new(RecordingPane::default());
    let governor = Arc::new(Governor::new());
    // Build up delay first so a shrink is observable.
    for _ in 0..3 {
        governor.record_rate_limit("anthropic", "test").await;
    }
    let before = governor.optimal_delay("anthropic").await;

    let injector = Injector::new(Arc::clone(&pane), Some(Arc::clone(&governor)));
    // inject() contributes one success; nine more complete the threshold.
    injector.inject("s:0.0", "claude", "hello").await.unwrap();
    for _ in 0..9 {
        governor.record_success("anthropic").await;
    }

    let after = governor.optimal_delay("anthropic").await;
    assert!(after < before, "delay should shrink once 10 successes accrue, including the injector's own");
}

#[tokio::test]
async fn inject_batch_stops_when_cancelled_between_panes() {
    let pane = Arc::new(RecordingPane::default());
    let injector = Injector::new(Arc::clone(&pane), None);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let panes = vec![("s:0.0".to_owned(), "claude".to_owned()), ("s:0.1".to_owned(), "claude".to_owned())];
    let results = injector.inject_batch(&panes, "hi", &cancel).await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn inject_batch_injects_all_panes_when_not_cancelled() {
    let pane = Arc::new(RecordingPane::default());
    let injector = Injector::new(Arc::clone(&pane), None);
    let cancel = CancellationToken::new();

    let panes = vec![("s:0.0".to_owned(), "claude".to_owned()), ("s:0.1".to_owned(), "claude".to_owned())];
    let results = injector.inject_batch(&panes, "hi", &cancel).await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_ok()));
}
