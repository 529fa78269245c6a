//! Error types for the store crate.

use refract_core::ObjectKey;
use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Object does not exist.
    #[error("{key} not found")]
    NotFound { key: ObjectKey },
    /// Object already exists.
    #[error("{key} already exists")]
    AlreadyExists { key: ObjectKey },
    /// Optimistic concurrency check failed.
    #[error("conflict on {key}: expected resourceVersion {expected}, stored {actual}")]
    Conflict {
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },
    /// Object rejected.
    #[error("invalid object: {reason}")]
    Invalid { reason: String },
    /// Subscriber fell behind and missed notifications.
    #[error("subscription lagged, {skipped} notifications skipped")]
    Lagged { skipped: u64 },
    /// Notification channel closed.
    #[error("store notification channel closed")]
    Closed,
}

impl StoreError {
    /// Create a not found error.
    #[must_use]
    pub fn not_found(key: &ObjectKey) -> Self {
        Self::NotFound { key: key.clone() }
    }

    /// Create an already exists error.
    #[must_use]
    pub fn already_exists(key: &ObjectKey) -> Self {
        Self::AlreadyExists { key: key.clone() }
    }

    /// Create a conflict error.
    #[must_use]
    pub fn conflict(key: &ObjectKey, expected: u64, actual: u64) -> Self {
        Self::Conflict {
            key: key.clone(),
            expected,
            actual,
        }
    }

    /// Create an invalid object error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    /// Whether the error means the object does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<refract_core::Error> for StoreError {
    fn from(err: refract_core::Error) -> Self {
        Self::invalid(err.to_string())
    }
}
