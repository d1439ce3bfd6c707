// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-person-rule (SLB) approval gate with expiry and blocking waiters (C9).
//!
//! Waiters are a concurrent map of one-shot notification channels. Approve
//! and Deny drain the waiter list for an ID out from under the lock, then
//! notify after releasing it, so a slow waiter can never hold up the writer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ntm_core::event_bus::EventBus;
use ntm_core::model::{Approval, ApprovalStatus};
use ntm_core::ErrorKind;
use tokio::sync::{mpsc, RwLock};

pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(24 * 3600);

pub struct RequestParams {
    pub action: String,
    pub resource: String,
    pub reason: String,
    pub requested_by: String,
    pub correlation_id: String,
    pub requires_slb: bool,
    pub expires_in: Option<Duration>,
}

pub struct ApprovalEngine {
    approvals: RwLock<HashMap<String, Approval>>,
    waiters: RwLock<HashMap<String, Vec<mpsc::Sender<()>>>>,
    event_bus: Option<Arc<EventBus>>,
    /// When set, restricts who may approve an SLB-gated request beyond the
    /// "not the requester" rule.
    slb_allow_list: Option<HashSet<String>>,
    seq: std::sync::atomic::AtomicU64,
}

impl ApprovalEngine {
    pub fn new(event_bus: Option<Arc<EventBus>>, slb_allow_list: Option<HashSet<String>>) -> Self {
        Self {
            approvals: RwLock::new(HashMap::new()),
            waiters: RwLock::new(HashMap::new()),
            event_bus,
            slb_allow_list,
            seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    async fn publish(&self, topic: &str, approval: &Approval) {
        if let Some(ref bus) = self.event_bus {
            bus.publish(topic, serde_json::json!(approval)).await;
        }
    }

    pub async fn request(&self, params: RequestParams) -> Approval {
        let now = SystemTime::now();
        let seq = self.seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let id = generate_id(now, seq);
        let expires_at = now + params.expires_in.unwrap_or(DEFAULT_EXPIRY);

        let approval = Approval {
            id: id.clone(),
            action: params.action,
            resource: params.resource,
            reason: params.reason,
            requested_by: params.requested_by,
            correlation_id: params.correlation_id,
            requires_slb: params.requires_slb,
            created_at: now,
            expires_at,
            status: ApprovalStatus::Pending,
            approved_by: None,
            approved_at: None,
            denied_reason: None,
        };

        self.approvals.write().await.insert(id.clone(), approval.clone());
        self.publish("approval.requested", &approval).await;
        approval
    }

    /// Lazily reclassify an expired Pending approval, persisting the change.
    pub async fn check(&self, id: &str) -> Option<Approval> {
        let maybe_expired = {
            let mut approvals = self.approvals.write().await;
            let approval = approvals.get_mut(id)?;
            if approval.status == ApprovalStatus::Pending && SystemTime::now() > approval.expires_at {
                approval.status = ApprovalStatus::Expired;
                Some(approval.clone())
            } else {
                return Some(approval.clone());
            }
        };
        if let Some(ref expired) = maybe_expired {
            self.publish("approval.expired", expired).await;
        }
        maybe_expired
    }

    pub async fn approve(&self, id: &str, approver_id: &str) -> anyhow::Result<Approval> {
        let approval = self.transition(id, approver_id, true, None).await?;
        self.publish("approval.approved", &approval).await;
        self.wake_waiters(id).await;
        Ok(approval)
    }

    pub async fn deny(&self, id: &str, approver_id: &str, reason: &str) -> anyhow::Result<Approval> {
        let approval = self.transition(id, approver_id, false, Some(reason.to_owned())).await?;
        self.publish("approval.denied", &approval).await;
        self.wake_waiters(id).await;
        Ok(approval)
    }

    async fn transition(
        &self,
        id: &str,
        approver_id: &str,
        approve: bool,
        deny_reason: Option<String>,
    ) -> anyhow::Result<Approval> {
        // Expiry check first, via the same lazy path Check uses.
        self.check(id).await;

        let mut approvals = self.approvals.write().await;
        let approval = approvals
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("unknown approval: {id}").context(ErrorKind::InputValidation))?;

        if approval.status != ApprovalStatus::Pending {
            return Err(anyhow::anyhow!("approval {id} is not pending")
                .context(ErrorKind::PreconditionViolation));
        }

        if approval.requires_slb {
            if approver_id == approval.requested_by {
                return Err(anyhow::anyhow!("requester cannot approve their own SLB request")
                    .context(ErrorKind::PreconditionViolation));
            }
            if let Some(ref allow_list) = self.slb_allow_list {
                if !allow_list.contains(approver_id) {
                    return Err(anyhow::anyhow!("{approver_id} is not on the SLB allow-list")
                        .context(ErrorKind::PreconditionViolation));
                }
            }
        }

        if approve {
            approval.status = ApprovalStatus::Approved;
            approval.approved_by = Some(approver_id.to_owned());
            approval.approved_at = Some(SystemTime::now());
        } else {
            approval.status = ApprovalStatus::Denied;
            approval.approved_by = Some(approver_id.to_owned());
            approval.denied_reason = deny_reason;
        }
        Ok(approval.clone())
    }

    async fn wake_waiters(&self, id: &str) {
        let senders = {
            let mut waiters = self.waiters.write().await;
            waiters.remove(id).unwrap_or_default()
        };
        for sender in senders {
            let _ = sender.try_send(());
        }
    }

    /// Block until `id` leaves Pending, `timeout` elapses, or `cancel` fires.
    /// Returns the latest `Check` result regardless of which happened.
    pub async fn wait_for_approval(
        &self,
        id: &str,
        timeout: Duration,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Option<Approval> {
        let (tx, mut rx) = mpsc::channel(1);
        self.waiters.write().await.entry(id.to_owned()).or_default().push(tx);

        tokio::select! {
            _ = rx.recv() => {}
            _ = tokio::time::sleep(timeout) => {}
            _ = cancel.cancelled() => {}
        }

        if let Some(senders) = self.waiters.write().await.get_mut(id) {
            senders.retain(|s| !s.is_closed());
        }

        self.check(id).await
    }

    /// Batch-reclassify every Pending approval past its expiry.
    pub async fn expire_stale(&self) {
        let ids: Vec<String> = {
            let approvals = self.approvals.read().await;
            approvals
                .iter()
                .filter(|(_, a)| a.status == ApprovalStatus::Pending)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in ids {
            self.check(&id).await;
        }
    }
}

/// `appr-YYYYMMDD-HHMMSS-<16 hex>`. `seq` breaks ties within the same second.
fn generate_id(at: SystemTime, seq: u64) -> String {
    let secs = at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let (y, mo, d, h, mi, s) = civil_from_unix_secs(secs);
    let unique = uuid::Uuid::new_v4().simple().to_string();
    let suffix = format!("{:08x}{:08x}", seq as u32, u32::from_str_radix(&unique[..8], 16).unwrap_or(0));
    format!("appr-{y:04}{mo:02}{d:02}-{h:02}{mi:02}{s:02}-{}", &suffix[..16])
}

/// Howard Hinnant's days-from-civil inverse, specialized to UTC epoch seconds.
pub(crate) fn civil_from_unix_secs(secs: u64) -> (u32, u32, u32, u32, u32, u32) {
    let days = (secs / 86400) as i64;
    let rem = secs % 86400;
    let (h, mi, s) = ((rem / 3600) as u32, ((rem % 3600) / 60) as u32, (rem % 60) as u32);

    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y as u32, m, d, h, mi, s)
}

#[cfg(test)]
#[path = "approval_tests.rs"]
mod tests;
