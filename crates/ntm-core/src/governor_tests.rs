// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn three_rate_limits_then_ten_successes_matches_adaptive_law() {
    let governor = Governor::new();
    for _ in 0..3 {
        governor.record_rate_limit("anthropic", "spawn").await;
    }
    let expected_after_limits =
        min_delay("anthropic").mul_f64(GROWTH_FACTOR).mul_f64(GROWTH_FACTOR).mul_f64(GROWTH_FACTOR);
    assert_eq!(governor.optimal_delay("anthropic").await, expected_after_limits);

    for _ in 0..10 {
        governor.record_success("anthropic").await;
    }
    let expected_after_successes = expected_after_limits.mul_f64(SHRINK_FACTOR);
    assert_eq!(governor.optimal_delay("anthropic").await, expected_after_successes);

    let map = governor.inner.read().await;
    assert_eq!(map.get("anthropic").unwrap().consecutive_success, 0);
}

#[tokio::test]
async fn current_delay_stays_within_min_and_max() {
    let governor = Governor::new();
    for _ in 0..100 {
        governor.record_rate_limit("openai", "spawn").await;
    }
    let delay = governor.optimal_delay("openai").await;
    assert!(delay >= min_delay("openai"));
    assert!(delay <= MAX_DELAY);
    assert_eq!(delay, MAX_DELAY, "should saturate well before 100 consecutive limits");
}

#[tokio::test]
async fn saturates_at_ceiling_after_expected_step_count() {
    let governor = Governor::new();
    // log_1.5(10min / 500ms) ~= 11.3, so after 12 steps we must be saturated.
    for _ in 0..12 {
        governor.record_rate_limit("google", "spawn").await;
    }
    assert_eq!(governor.optimal_delay("google").await, MAX_DELAY);
}

#[tokio::test]
async fn cooldown_only_extends_never_shortens() {
    let governor = Governor::new();
    governor.record_rate_limit_with_cooldown("anthropic", "spawn", 100).await;
    let first = governor.cooldown_remaining("anthropic").await;
    governor.record_rate_limit_with_cooldown("anthropic", "spawn", 10).await;
    let second = governor.cooldown_remaining("anthropic").await;
    assert!(second >= first - Duration::from_secs(1), "cooldown must not move backwards");
    assert!(governor.is_in_cooldown("anthropic").await);
}

#[tokio::test]
async fn clear_cooldown_resets_without_affecting_delay() {
    let governor = Governor::new();
    governor.record_rate_limit_with_cooldown("anthropic", "spawn", 100).await;
    assert!(governor.is_in_cooldown("anthropic").await);
    governor.clear_cooldown("anthropic").await;
    assert!(!governor.is_in_cooldown("anthropic").await);
}

#[tokio::test]
async fn save_then_load_round_trips_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let governor = Governor::new();
    governor.record_rate_limit_with_cooldown("anthropic", "spawn", 42).await;
    governor.save_to_dir(dir.path()).await.expect("save");

    let reloaded = Governor::new();
    reloaded.load_from_dir(dir.path()).await.expect("load");
    assert_eq!(
        reloaded.optimal_delay("anthropic").await,
        governor.optimal_delay("anthropic").await
    );
    assert!(reloaded.is_in_cooldown("anthropic").await);
}

#[tokio::test]
async fn load_sanitizes_out_of_range_persisted_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ntm_dir = dir.path().join(".ntm");
    tokio::fs::create_dir_all(&ntm_dir).await.expect("mkdir");
    let far_future = SystemTime::now() + Duration::from_secs(7200);
    let bad_state = serde_json::json!({
        "state": {
            "anthropic": {
                "current_delay": {"secs": 7200, "nanos": 0},
                "consecutive_success": 0,
                "total_rate_limits": 1,
                "total_successes": 0,
                "cooldown_until": far_future,
            }
        }
    });
    tokio::fs::write(ntm_dir.join("rate_limits.json"), serde_json::to_vec(&bad_state).unwrap())
        .await
        .expect("write");

    let governor = Governor::new();
    governor.load_from_dir(dir.path()).await.expect("load");
    assert_eq!(governor.optimal_delay("anthropic").await, min_delay("anthropic"));
    assert!(!governor.is_in_cooldown("anthropic").await);
}

#[yare::parameterized(
    retry_after_header = { "Error 429. Retry-After: 12", 12 },
    try_again_in_seconds = { "please try again in 7 seconds", 7 },
    wait_seconds = { "wait 30s and retry", 30 },
    try_again_in_minutes = { "try again in 2 minutes", 120 },
    cooldown_form = { "5s cooldown before next call", 5 },
    no_hint_present = { "connection reset by peer", 0 },
)]
fn parses_wait_hint(raw: &str, expected: i64) {
    assert_eq!(parse_wait_seconds(raw), expected);
}

#[test]
fn strips_ansi_before_matching() {
    let raw = "\u{1b}[31merror\u{1b}[0m: try again in 9 seconds";
    assert_eq!(parse_wait_seconds(raw), 9);
}
