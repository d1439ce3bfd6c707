// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Error kinds shared across every NTM component.
///
/// These are attached to an [`anyhow::Error`] as context rather than used as
/// the error type directly: `anyhow::bail!(...)` and `.context(ErrorKind::X)`
/// both compose, and a caller that needs to branch on kind downcasts the
/// chain with [`ErrorKind::of`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad agent type, bad session name, out-of-range retry index.
    InputValidation,
    /// Duplicate daemon, approval not pending, SLB self-approval, unknown approval ID.
    PreconditionViolation,
    /// No free port, retry budget exceeded, event channel full.
    ResourceExhaustion,
    /// TM send failed, health probe timed out, HTTP webhook failed.
    TransientIO,
    /// Process exec failed, cannot write PID file, cannot persist approval state.
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputValidation => "input_validation",
            Self::PreconditionViolation => "precondition_violation",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::TransientIO => "transient_io",
            Self::Fatal => "fatal",
        }
    }

    /// Whether a control loop should log-and-continue (`true`) or abort (`false`)
    /// on an error of this kind, per the propagation policy.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Fatal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ErrorKind {}

/// Attach an [`ErrorKind`] to an error and return it as `anyhow::Error`.
///
/// Downstream code recovers the kind with `err.downcast_ref::<ErrorKind>()`
/// or by walking `err.chain()`.
pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain().find_map(|cause| cause.downcast_ref::<ErrorKind>().copied())
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
