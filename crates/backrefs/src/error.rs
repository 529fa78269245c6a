//! Error types for back-reference bookkeeping.

use refract_store::StoreError;
use thiserror::Error;

/// Result type alias for back-reference operations.
pub type Result<T> = std::result::Result<T, BackrefError>;

/// Back-reference failures.
///
/// Missing targets are not errors; they are reported in
/// [`crate::ReferenceDiff::missing`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackrefError {
    /// The store rejected a read or write of a target.
    #[error("update back-reference: {0}")]
    Store(#[from] StoreError),
}
