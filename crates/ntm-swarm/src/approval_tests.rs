// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;

fn params(requested_by: &str, requires_slb: bool) -> RequestParams {
    RequestParams {
        action: "kill_daemon".to_owned(),
        resource: "daemon:redis".to_owned(),
        reason: "memory leak".to_owned(),
        requested_by: requested_by.to_owned(),
        correlation_id: "corr-1".to_owned(),
        requires_slb,
        expires_in: None,
    }
}

#[test]
fn generated_id_matches_the_documented_shape() {
    let id = generate_id(SystemTime::now(), 0);
    assert!(id.starts_with("appr-"));
    let rest = &id["appr-".len()..];
    let (date, rest) = rest.split_once('-').unwrap();
    let (time, hex) = rest.split_once('-').unwrap();
    assert_eq!(date.len(), 8);
    assert_eq!(time.len(), 6);
    assert_eq!(hex.len(), 16);
    assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn request_then_approve_happy_path() {
    let engine = ApprovalEngine::new(None, None);
    let approval = engine.request(params("alice", false)).await;
    assert_eq!(approval.status, ApprovalStatus::Pending);

    let approved = engine.approve(&approval.id, "bob").await.unwrap();
    assert_eq!(approved.status, ApprovalStatus::Approved);
    assert_eq!(approved.approved_by.as_deref(), Some("bob"));
}

#[tokio::test]
async fn slb_requester_cannot_approve_their_own_request() {
    let engine = ApprovalEngine::new(None, None);
    let approval = engine.request(params("alice", true)).await;
    let result = engine.approve(&approval.id, "alice").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn slb_allow_list_restricts_approvers() {
    let allow_list = HashSet::from(["bob".to_owned()]);
    let engine = ApprovalEngine::new(None, Some(allow_list));
    let approval = engine.request(params("alice", true)).await;

    assert!(engine.approve(&approval.id, "carol").await.is_err());
    assert!(engine.approve(&approval.id, "bob").await.is_ok());
}

#[tokio::test]
async fn deny_records_reason_and_is_terminal() {
    let engine = ApprovalEngine::new(None, None);
    let approval = engine.request(params("alice", false)).await;
    let denied = engine.deny(&approval.id, "bob", "too risky").await.unwrap();
    assert_eq!(denied.status, ApprovalStatus::Denied);
    assert_eq!(denied.denied_reason.as_deref(), Some("too risky"));

    // Terminal: a second transition attempt fails.
    assert!(engine.approve(&approval.id, "carol").await.is_err());
}

#[tokio::test]
async fn check_lazily_expires_past_deadline() {
    let engine = ApprovalEngine::new(None, None);
    let mut params = params("alice", false);
    params.expires_in = Some(Duration::from_millis(10));
    let approval = engine.request(params).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let checked = engine.check(&approval.id).await.unwrap();
    assert_eq!(checked.status, ApprovalStatus::Expired);
}

#[tokio::test]
async fn wait_for_approval_wakes_on_approve() {
    let engine = Arc::new(ApprovalEngine::new(None, None));
    let approval = engine.request(params("alice", false)).await;
    let cancel = CancellationToken::new();

    let waiter_engine = Arc::clone(&engine);
    let id = approval.id.clone();
    let waiter = tokio::spawn(async move {
        waiter_engine.wait_for_approval(&id, Duration::from_secs(5), &cancel).await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.approve(&approval.id, "bob").await.unwrap();

    let result = waiter.await.unwrap().unwrap();
    assert_eq!(result.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn wait_for_approval_times_out_and_removes_its_waiter_slot() {
    let engine = ApprovalEngine::new(None, None);
    let approval = engine.request(params("alice", false)).await;
    let cancel = CancellationToken::new();

    let result = engine.wait_for_approval(&approval.id, Duration::from_millis(20), &cancel).await;
    assert_eq!(result.unwrap().status, ApprovalStatus::Pending);
    let still_waiting = engine.waiters.read().await.get(&approval.id).map(|v| !v.is_empty()).unwrap_or(false);
    assert!(!still_waiting);
}

#[tokio::test]
async fn expire_stale_batch_reclassifies_all_pending_past_expiry() {
    let engine = ApprovalEngine::new(None, None);
    let mut p1 = params("alice", false);
    p1.expires_in = Some(Duration::from_millis(10));
    let a1 = engine.request(p1).await;
    let a2 = engine.request(params("alice", false)).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.expire_stale().await;

    assert_eq!(engine.check(&a1.id).await.unwrap().status, ApprovalStatus::Expired);
    assert_eq!(engine.check(&a2.id).await.unwrap().status, ApprovalStatus::Pending);
}
