// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process typed pub/sub (C11).
//!
//! Delivery is non-blocking: a subscriber with a full channel misses the
//! event, other subscribers are unaffected. FIFO is preserved per subscriber;
//! there is no ordering guarantee across subscribers. Intended sole use is
//! fan-out of lifecycle events (`approval.*`, `agent.*`, `session.*`,
//! `health.*`, `rotation.*`) to external collaborators (webhook bridge,
//! notifier) — NTM itself only produces and internally consumes events.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

/// A published event: a topic string (see §6 of the spec for the fixed set)
/// plus an arbitrary JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// A subscription's topic filter.
#[derive(Debug, Clone)]
pub enum TopicFilter {
    All,
    Topics(HashSet<String>),
}

impl TopicFilter {
    fn matches(&self, topic: &str) -> bool {
        match self {
            Self::All => true,
            Self::Topics(set) => set.contains(topic),
        }
    }
}

struct Subscriber {
    id: u64,
    filter: TopicFilter,
    tx: mpsc::Sender<Event>,
}

/// Default per-subscriber channel capacity, matching the 100-entry buffering
/// used elsewhere in the control plane.
pub const DEFAULT_CAPACITY: usize = 100;

pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self { subscribers: RwLock::new(Vec::new()), next_id: AtomicU64::new(1) }
    }

    /// Register a subscriber with the given filter and channel capacity.
    /// Returns an opaque subscription ID and the receiving end.
    pub async fn subscribe(&self, filter: TopicFilter, capacity: usize) -> (u64, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().await.push(Subscriber { id, filter, tx });
        (id, rx)
    }

    /// Remove a subscription. Idempotent: removing an already-removed or
    /// unknown ID is a no-op.
    pub async fn unsubscribe(&self, id: u64) {
        self.subscribers.write().await.retain(|s| s.id != id);
    }

    /// Publish an event. Subscribers whose filter matches the topic and whose
    /// channel has room receive it; a full channel silently drops the event
    /// for that subscriber only.
    pub async fn publish(&self, topic: &str, payload: serde_json::Value) {
        let event = Event { topic: topic.to_owned(), payload };
        let subscribers = self.subscribers.read().await;
        for sub in subscribers.iter() {
            if !sub.filter.matches(topic) {
                continue;
            }
            if sub.tx.try_send(event.clone()).is_err() {
                warn!(topic, subscriber_id = sub.id, "event bus channel full, dropping event");
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[cfg(test)]
#[path = "event_bus_tests.rs"]
mod tests;
