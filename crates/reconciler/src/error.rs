//! Error types for the reconciler crate.

use std::fmt;
use std::time::Duration;

use refract_backrefs::BackrefError;
use refract_core::{Kind, ObjectKey};
use refract_store::StoreError;
use itertools::Itertools;
use refract_transform::{ConvertError, TransformError};
use thiserror::Error;

use crate::types::{RetryPolicy, SyncReason};

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// A reference or output rule that names the wrong number of targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("configMap or secret required but both specified")]
    AmbiguousResource,
    #[error("neither configMap or secret specified")]
    UnspecifiedResource,
    #[error("no transformation specified")]
    MissingTransformation,
}

/// Why one output rule could not be planned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputCause {
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error(transparent)]
    Query(#[from] TransformError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

/// A failed output rule, by declaration index and field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFailure {
    pub index: usize,
    pub field: Option<String>,
    pub cause: OutputCause,
}

impl fmt::Display for OutputFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "output {}: {field}: {}", self.index, self.cause),
            None => write!(f, "output {}: {}", self.index, self.cause),
        }
    }
}

fn join_failures(failures: &[OutputFailure]) -> String {
    failures.iter().join("; ")
}

/// Reconciliation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// The transform could not be read.
    #[error("load {key}: {source}")]
    Load { key: ObjectKey, source: StoreError },

    /// An input reference names the wrong number of bundles.
    #[error("input {input}: {source}")]
    InvalidInput { input: String, source: SpecError },

    /// A referenced input does not exist.
    #[error("input {input}: {source}")]
    MissingInput { input: String, source: StoreError },

    /// Reading an input failed.
    #[error("input {input}: {source}")]
    ReadInput { input: String, source: StoreError },

    /// One or more output rules failed to plan.
    #[error("{}", join_failures(.failures))]
    InvalidOutputs { failures: Vec<OutputFailure> },

    /// Updating back-references failed.
    #[error(transparent)]
    Link(#[from] BackrefError),

    /// Writing an output failed.
    #[error("write {key}: {source}")]
    Write { key: ObjectKey, source: StoreError },

    /// Writing the transform itself failed.
    #[error("update {key}: {source}")]
    Update { key: ObjectKey, source: StoreError },

    /// Listing transforms for the controller loop failed.
    #[error("list {kind}: {source}")]
    List { kind: Kind, source: StoreError },

    /// The planning task did not finish.
    #[error("plan outputs: {reason}")]
    Plan { reason: String },
}

impl ReconcileError {
    /// Reason shown on the `Synced` condition.
    #[must_use]
    pub const fn reason(&self) -> SyncReason {
        match self {
            Self::MissingInput { .. } => SyncReason::MissingInput,
            Self::InvalidInput { .. } | Self::InvalidOutputs { .. } => SyncReason::InvalidSpec,
            Self::Write { .. } => SyncReason::FailedWrite,
            Self::Load { .. }
            | Self::ReadInput { .. }
            | Self::Link(_)
            | Self::Update { .. }
            | Self::List { .. }
            | Self::Plan { .. } => SyncReason::Failed,
        }
    }

    /// How the failed pass should be retried.
    #[must_use]
    pub const fn retry(&self, missing_input_delay: Duration) -> RetryPolicy {
        match self.reason() {
            SyncReason::MissingInput => RetryPolicy::After(missing_input_delay),
            SyncReason::InvalidSpec => RetryPolicy::Never,
            SyncReason::FailedWrite | SyncReason::Failed => RetryPolicy::Backoff,
        }
    }
}
