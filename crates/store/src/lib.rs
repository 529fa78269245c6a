//! Object store for refract.
//!
//! Provides the [`ResourceStore`] trait the reconciler talks to, an in-memory
//! implementation with owner-reference garbage collection, change
//! notifications, and the [`create_or_update`] helper.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod event;
pub mod store;
pub mod upsert;

pub use error::{Result, StoreError};
pub use event::{EventAction, StoreEvent, StoreSubscription};
pub use store::{InMemoryStore, ResourceStore, TracingStore};
pub use upsert::{OperationResult, create_or_update};
