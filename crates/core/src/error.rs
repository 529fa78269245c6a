//! Core error types for object model operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use thiserror::Error;

use crate::object::Kind;

/// Result type alias for object model operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for object model operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("expected a {expected} but got a {actual}")]
    KindMismatch { expected: Kind, actual: Kind },

    #[error("manifest parse error: {reason}")]
    ManifestParse { reason: String },

    #[error("invalid object: {reason}")]
    InvalidObject { reason: String },
}

impl Error {
    /// Create a kind mismatch error.
    #[must_use]
    pub const fn kind_mismatch(expected: Kind, actual: Kind) -> Self {
        Self::KindMismatch { expected, actual }
    }

    /// Create a manifest parse error.
    pub fn manifest_parse(reason: impl Into<String>) -> Self {
        Self::ManifestParse {
            reason: reason.into(),
        }
    }

    /// Create an invalid object error.
    pub fn invalid_object(reason: impl Into<String>) -> Self {
        Self::InvalidObject {
            reason: reason.into(),
        }
    }
}
