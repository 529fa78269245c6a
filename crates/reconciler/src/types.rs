//! Core types for the reconciler.

use std::fmt;
use std::time::Duration;

use refract_core::ObjectKey;
use refract_store::OperationResult;

/// Reason recorded on the `Synced` condition when a pass fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReason {
    /// An input does not exist (yet).
    MissingInput,
    /// The spec cannot be satisfied until it is edited.
    InvalidSpec,
    /// Writing an output failed.
    FailedWrite,
    /// Anything else.
    Failed,
}

impl SyncReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingInput => "MissingInput",
            Self::InvalidSpec => "InvalidSpec",
            Self::FailedWrite => "FailedWrite",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for SyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a failed pass should run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Only when something changes.
    Never,
    /// After a fixed delay.
    After(Duration),
    /// With per-key exponential backoff.
    Backoff,
}

/// What happened to the transform in a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Outputs and status match the spec.
    Synced,
    /// Back-references were dropped and the finalizer removed.
    Finalized,
    /// Being deleted by someone else; nothing to do.
    Deleting,
    /// The transform no longer exists.
    Gone,
}

/// One output write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedOutput {
    pub key: ObjectKey,
    pub result: OperationResult,
}

/// Result of a successful reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileResult {
    pub key: ObjectKey,
    pub outcome: Outcome,
    pub outputs: Vec<AppliedOutput>,
    pub status_updated: bool,
}

impl ReconcileResult {
    pub(crate) const fn new(key: ObjectKey, outcome: Outcome) -> Self {
        Self {
            key,
            outcome,
            outputs: Vec::new(),
            status_updated: false,
        }
    }

    pub(crate) fn synced(key: ObjectKey, outputs: Vec<AppliedOutput>, status_updated: bool) -> Self {
        Self {
            key,
            outcome: Outcome::Synced,
            outputs,
            status_updated,
        }
    }

    /// Whether the pass wrote nothing.
    #[must_use]
    pub fn converged(&self) -> bool {
        !self.status_updated
            && self
                .outputs
                .iter()
                .all(|o| o.result == OperationResult::Unchanged)
    }
}
