// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adaptive rate-limit governor (C2).
//!
//! Converts observed limit events into per-provider delays and cooldowns,
//! persisted to `<dir>/.ntm/rate_limits.json` so state survives restarts.
//! Serves both the prompt injector (spacing, via [`Governor::optimal_delay`])
//! and the respawner (cooldown, via [`Governor::is_in_cooldown`]).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::canon::normalize_provider;
use crate::model::{ProviderState, RateLimitEvent};

/// Ceiling enforced on `CurrentDelay`. Exists specifically because uncapped
/// geometric growth on a 64-bit nanosecond duration overflows in ~61 steps.
pub const MAX_DELAY: Duration = Duration::from_secs(600);

const GROWTH_FACTOR: f64 = 1.5;
const SHRINK_FACTOR: f64 = 0.9;
const SUCCESSES_BEFORE_SHRINK: u32 = 10;
const HISTORY_CAP: usize = 100;

/// Per-provider minimum delay floor.
fn min_delay(provider: &str) -> Duration {
    match provider {
        "anthropic" => Duration::from_millis(500),
        "openai" => Duration::from_millis(500),
        "google" => Duration::from_millis(500),
        _ => Duration::from_millis(500),
    }
}

fn default_provider_state(provider: &str) -> ProviderState {
    ProviderState {
        current_delay: min_delay(provider),
        consecutive_success: 0,
        last_rate_limit: None,
        cooldown_until: None,
        total_rate_limits: 0,
        total_successes: 0,
    }
}

#[derive(Default, Serialize, Deserialize)]
struct PersistedState {
    state: HashMap<String, ProviderState>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    history: HashMap<String, Vec<RateLimitEvent>>,
}

/// Online learner turning rate-limit signals into per-provider delay/cooldown state.
pub struct Governor {
    inner: RwLock<HashMap<String, ProviderState>>,
    history: RwLock<HashMap<String, Vec<RateLimitEvent>>>,
}

impl Default for Governor {
    fn default() -> Self {
        Self::new()
    }
}

impl Governor {
    pub fn new() -> Self {
        Self { inner: RwLock::new(HashMap::new()), history: RwLock::new(HashMap::new()) }
    }

    async fn entry(&self, provider: &str) -> ProviderState {
        let map = self.inner.read().await;
        map.get(provider).cloned().unwrap_or_else(|| default_provider_state(provider))
    }

    /// Record a rate-limit event with no explicit cooldown hint. Equivalent
    /// to `RecordRateLimitWithCooldown(provider, action, 0)`.
    pub async fn record_rate_limit(&self, provider: &str, action: &str) {
        let _ = self.record_rate_limit_with_cooldown(provider, action, 0).await;
    }

    /// Record a rate-limit event, applying the adaptive delay law and
    /// extending `CooldownUntil`. Returns the resulting cooldown duration
    /// from now.
    pub async fn record_rate_limit_with_cooldown(
        &self,
        provider: &str,
        action: &str,
        wait_seconds: i64,
    ) -> Duration {
        let provider = normalize_provider(provider);
        let now = SystemTime::now();

        let mut map = self.inner.write().await;
        let state = map.entry(provider.clone()).or_insert_with(|| default_provider_state(&provider));

        let grown = state.current_delay.mul_f64(GROWTH_FACTOR);
        state.current_delay = grown.min(MAX_DELAY);
        state.consecutive_success = 0;
        state.total_rate_limits += 1;
        state.last_rate_limit = Some(now);

        let requested = if wait_seconds > 0 {
            Duration::from_secs(wait_seconds as u64)
        } else {
            state.current_delay
        };
        let candidate = now + requested;
        let cooldown_until = match state.cooldown_until {
            Some(existing) if existing > candidate => existing,
            _ => candidate,
        };
        state.cooldown_until = Some(cooldown_until);
        drop(map);

        tracing::info!(provider = %provider, action, wait_seconds, "rate limit recorded");

        let mut history = self.history.write().await;
        let ring = history.entry(provider).or_default();
        ring.push(RateLimitEvent { at: now, wait: requested });
        if ring.len() > HISTORY_CAP {
            let excess = ring.len() - HISTORY_CAP;
            ring.drain(0..excess);
        }

        cooldown_until.duration_since(now).unwrap_or_default()
    }

    /// Record a successful call. After 10 consecutive successes the delay
    /// shrinks by 10%, floored at the provider minimum.
    pub async fn record_success(&self, provider: &str) {
        let provider = normalize_provider(provider);
        let mut map = self.inner.write().await;
        let state = map.entry(provider.clone()).or_insert_with(|| default_provider_state(&provider));
        state.consecutive_success += 1;
        state.total_successes += 1;
        if state.consecutive_success >= SUCCESSES_BEFORE_SHRINK {
            let shrunk = state.current_delay.mul_f64(SHRINK_FACTOR);
            state.current_delay = shrunk.max(min_delay(&provider));
            state.consecutive_success = 0;
        }
    }

    /// Current adaptive delay, used by the prompt injector for stagger spacing.
    pub async fn optimal_delay(&self, provider: &str) -> Duration {
        self.entry(&normalize_provider(provider)).await.current_delay
    }

    /// Remaining time until cooldown lifts, or `Duration::ZERO` if not in cooldown.
    pub async fn cooldown_remaining(&self, provider: &str) -> Duration {
        let state = self.entry(&normalize_provider(provider)).await;
        match state.cooldown_until {
            Some(until) => until.duration_since(SystemTime::now()).unwrap_or_default(),
            None => Duration::ZERO,
        }
    }

    pub async fn is_in_cooldown(&self, provider: &str) -> bool {
        self.cooldown_remaining(provider).await > Duration::ZERO
    }

    /// Clear any cooldown for `provider`. Does not affect `CurrentDelay`.
    pub async fn clear_cooldown(&self, provider: &str) {
        let provider = normalize_provider(provider);
        let mut map = self.inner.write().await;
        if let Some(state) = map.get_mut(&provider) {
            state.cooldown_until = None;
        }
    }

    fn persist_path(dir: &Path) -> PathBuf {
        dir.join(".ntm").join("rate_limits.json")
    }

    /// Load governor state from `<dir>/.ntm/rate_limits.json`, sanitizing
    /// values that indicate an earlier overflow bug: `CurrentDelay` outside
    /// `[0, 1h]` is zeroed and re-floored; `CooldownUntil` more than an hour
    /// in the future is cleared.
    pub async fn load_from_dir(&self, dir: &Path) -> anyhow::Result<()> {
        let path = Self::persist_path(dir);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(anyhow::Error::new(e).context(crate::error::ErrorKind::TransientIO)),
        };
        let mut persisted: PersistedState = serde_json::from_slice(&bytes)
            .map_err(|e| anyhow::Error::new(e).context(crate::error::ErrorKind::InputValidation))?;

        let now = SystemTime::now();
        for (provider, state) in persisted.state.iter_mut() {
            if state.current_delay > Duration::from_secs(3600) {
                warn!(provider, "sanitizing out-of-range current_delay on load");
                state.current_delay = min_delay(provider);
            }
            if let Some(until) = state.cooldown_until {
                if until.duration_since(now).map(|d| d > Duration::from_secs(3600)).unwrap_or(false) {
                    warn!(provider, "sanitizing far-future cooldown_until on load");
                    state.cooldown_until = None;
                }
            }
        }

        *self.inner.write().await = persisted.state;
        *self.history.write().await = persisted.history;
        Ok(())
    }

    /// Save governor state to `<dir>/.ntm/rate_limits.json`.
    pub async fn save_to_dir(&self, dir: &Path) -> anyhow::Result<()> {
        let path = Self::persist_path(dir);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| anyhow::Error::new(e).context(crate::error::ErrorKind::Fatal))?;
        }
        let persisted = PersistedState {
            state: self.inner.read().await.clone(),
            history: self.history.read().await.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&persisted)
            .map_err(|e| anyhow::Error::new(e).context(crate::error::ErrorKind::Fatal))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| anyhow::Error::new(e).context(crate::error::ErrorKind::Fatal))?;
        Ok(())
    }
}

/// Strip ANSI escape sequences (`ESC [ ... letter`) before pattern matching.
fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Wait-hint patterns, tried in priority order; the first match wins.
/// Compiled once. A pattern that fails to compile is silently dropped from
/// the set rather than panicking at lookup time.
static WAIT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)retry-after:\s*(\d+)",
        r"(?i)try again in\s+(\d+)\s*s(?:econds)?",
        r"(?i)wait\s+(\d+)\s*s(?:econds)?",
        r"(?i)try again in\s+(\d+)\s*m(?:inutes)?",
        r"(?i)(\d+)\s*s(?:econd)?s?\s*cooldown",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Extract a wait hint (in seconds) from captured output. Returns 0 when no
/// hint is found.
pub fn parse_wait_seconds(raw: &str) -> i64 {
    let text = strip_ansi(raw);

    for (idx, re) in WAIT_PATTERNS.iter().enumerate() {
        if let Some(caps) = re.captures(&text) {
            if let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<i64>().ok()) {
                // Minute-form patterns (index 3 above) are expressed in minutes.
                return if idx == 3 { value * 60 } else { value };
            }
        }
    }

    if text.contains("429") {
        return 0;
    }

    0
}

#[cfg(test)]
#[path = "governor_tests.rs"]
mod tests;
