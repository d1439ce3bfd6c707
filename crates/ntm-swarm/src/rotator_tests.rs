// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::SystemTime;

use super::*;

fn event(agent_type: &str) -> LimitEvent {
    LimitEvent {
        session_pane: "s:0.0".to_owned(),
        agent_type: agent_type.to_owned(),
        pattern: "rate limit".to_owned(),
        raw_output: String::new(),
        detected_at: SystemTime::now(),
    }
}

#[tokio::test]
async fn rotates_round_robin_through_configured_accounts() {
    let governor = Arc::new(Governor::new());
    let rotator = Rotator::new(Arc::clone(&governor), CooldownPolicy::Ignore);
    rotator.configure_accounts("anthropic", vec!["a1".to_owned(), "a2".to_owned(), "a3".to_owned()]).await;

    let r1 = rotator.on_limit_hit(&event("claude")).await.unwrap();
    assert_eq!(r1.from_account.as_deref(), Some("a1"));
    assert_eq!(r1.to_account.as_deref(), Some("a2"));

    let r2 = rotator.on_limit_hit(&event("claude")).await.unwrap();
    assert_eq!(r2.from_account.as_deref(), Some("a2"));
    assert_eq!(r2.to_account.as_deref(), Some("a3"));

    let r3 = rotator.on_limit_hit(&event("claude")).await.unwrap();
    assert_eq!(r3.to_account.as_deref(), Some("a1"), "wraps back to the first account");
}

#[tokio::test]
async fn unknown_provider_propagates_unchanged() {
    let governor = Arc::new(Governor::new());
    let rotator = Rotator::new(governor, CooldownPolicy::Ignore);
    let result = rotator.on_limit_hit(&event("some-unregistered-agent")).await;
    assert!(result.is_none());
}

#[tokio::test]
async fn respecting_cooldown_policy_declines_to_rotate_while_in_cooldown() {
    let governor = Arc::new(Governor::new());
    governor.record_rate_limit_with_cooldown("anthropic", "test", 60).await;
    let rotator = Rotator::new(Arc::clone(&governor), CooldownPolicy::Respect);
    rotator.configure_accounts("anthropic", vec!["a1".to_owned(), "a2".to_owned()]).await;

    let record = rotator.on_limit_hit(&event("claude")).await.unwrap();
    assert_eq!(record.from_account, record.to_account, "no rotation while cooldown is respected");
}

#[tokio::test]
async fn ignoring_cooldown_policy_rotates_regardless() {
    let governor = Arc::new(Governor::new());
    governor.record_rate_limit_with_cooldown("anthropic", "test", 60).await;
    let rotator = Rotator::new(Arc::clone(&governor), CooldownPolicy::Ignore);
    rotator.configure_accounts("anthropic", vec!["a1".to_owned(), "a2".to_owned()]).await;

    let record = rotator.on_limit_hit(&event("claude")).await.unwrap();
    assert_ne!(record.from_account, record.to_account);
}
