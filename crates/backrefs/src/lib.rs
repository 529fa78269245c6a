//! Back-reference bookkeeping for refract.
//!
//! A `SecretTransform` reads Secrets and ConfigMaps it does not own. To let
//! changes to those inputs trigger the transform, and to tie their lifecycle
//! to it where that is safe, every input carries a back-reference to the
//! transform. The transform's status records the set it linked last time so
//! the next pass can remove links that are no longer wanted.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod handler;
pub mod strategy;

pub use error::{BackrefError, Result};
pub use handler::{BackReferencesHandler, ReferenceDiff, ReferenceOwner, diff_references};
pub use strategy::{
    ANNOTATION_VALUE, AnnotationReferences, BackReferenceStrategy, CombinedReferences,
    OwnerReferences, annotation_key, parse_annotation_key,
};
