// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared data model and leaf components for the swarm control plane:
//! canonicalization, error kinds, redaction, the rate-limit governor, the
//! profile matcher, the tmux adapter, and the event bus. Composed into a
//! running control loop by `ntm-swarm`.

pub mod canon;
pub mod error;
pub mod event_bus;
pub mod governor;
pub mod model;
pub mod profile_matcher;
pub mod redact;
pub mod tm;
pub mod xdg;

pub use error::ErrorKind;
pub use event_bus::{Event, EventBus, TopicFilter};
pub use governor::Governor;
pub use profile_matcher::{recommend_agent, score_assignment, ScoreResult};
pub use redact::{RedactionMode, Redactor};
pub use tm::{BoxFuture, LocalTransport, PaneOps, SshTransport, TmAdapter, TmuxTransport};
