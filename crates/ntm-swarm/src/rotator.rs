// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Round-robin account rotation on rate-limit hits (C7).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use ntm_core::canon::normalize_provider;
use ntm_core::governor::Governor;
use ntm_core::model::{LimitEvent, RotationRecord};
use tokio::sync::RwLock;

/// Per-provider account pool plus the index of the account currently in use.
struct ProviderPool {
    accounts: Vec<String>,
    current: usize,
}

/// Whether the rotator respects an active Governor cooldown for the
/// provider by declining to rotate, or rotates through it regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownPolicy {
    Respect,
    Ignore,
}

pub struct Rotator {
    governor: Arc<Governor>,
    pools: RwLock<HashMap<String, ProviderPool>>,
    cooldown_policy: CooldownPolicy,
}

impl Rotator {
    pub fn new(governor: Arc<Governor>, cooldown_policy: CooldownPolicy) -> Self {
        Self { governor, pools: RwLock::new(HashMap::new()), cooldown_policy }
    }

    /// Register the account pool for a provider. Replaces any existing pool.
    pub async fn configure_accounts(&self, provider: &str, accounts: Vec<String>) {
        let provider = normalize_provider(provider);
        self.pools.write().await.insert(provider, ProviderPool { accounts, current: 0 });
    }

    pub async fn current_account(&self, provider: &str) -> Option<String> {
        let provider = normalize_provider(provider);
        let pools = self.pools.read().await;
        pools.get(&provider).and_then(|p| p.accounts.get(p.current).cloned())
    }

    /// On a limit hit, advance to the next account for the event's provider.
    /// Unknown providers (no configured pool) propagate unchanged: `None`.
    pub async fn on_limit_hit(&self, event: &LimitEvent) -> Option<RotationRecord> {
        let provider = ntm_core::canon::provider_for_agent_type(&event.agent_type);

        if self.cooldown_policy == CooldownPolicy::Respect
            && self.governor.is_in_cooldown(&provider).await
        {
            let from = self.current_account(&provider).await;
            return Some(RotationRecord {
                provider,
                from_account: from.clone(),
                to_account: from,
                rotated_at: SystemTime::now(),
                session_pane: event.session_pane.clone(),
                triggered_by: "limit_hit".to_owned(),
            });
        }

        let mut pools = self.pools.write().await;
        let pool = pools.get_mut(&provider)?;
        if pool.accounts.is_empty() {
            return None;
        }
        let from = pool.accounts.get(pool.current).cloned();
        pool.current = (pool.current + 1) % pool.accounts.len();
        let to = pool.accounts.get(pool.current).cloned();

        Some(RotationRecord {
            provider,
            from_account: from,
            to_account: to,
            rotated_at: SystemTime::now(),
            session_pane: event.session_pane.clone(),
            triggered_by: "limit_hit".to_owned(),
        })
    }
}

#[cfg(test)]
#[path = "rotator_tests.rs"]
mod tests;
