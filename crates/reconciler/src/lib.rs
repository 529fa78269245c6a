//! Reconciliation controller for `SecretTransform` resources.
//!
//! Each pass is level-triggered and re-derives everything from the current
//! store contents:
//!
//! 1. **Load** the transform; a missing transform needs no work.
//! 2. **Finalize** a transform being deleted: drop its back-references,
//!    then release the finalizer.
//! 3. **Resolve** the declared inputs into the query scope.
//! 4. **Link** the inputs back to the transform.
//! 5. **Plan** every output rule; any failure aborts before writing.
//! 6. **Write** each output with create-or-update.
//! 7. **Report** the `Synced` condition and the output hash, skipping the
//!    status write when nothing changed.
//!
//! [`ControllerLoop`] drives passes from store notifications through a
//! de-duplicating [`WorkQueue`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use refract_reconciler::{ControllerLoop, LoopConfig, Reconciler, ReconcilerConfig};
//! use refract_store::InMemoryStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryStore::new_arc();
//!     let reconciler = Arc::new(Reconciler::new(store, ReconcilerConfig::default()));
//!     let controller = ControllerLoop::new(reconciler, LoopConfig::default());
//!     let stopper = controller.stopper();
//!     // stopper.stop() from elsewhere ends run().
//!     let _ = controller.run().await;
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod config;
pub mod error;
pub mod inputs;
pub mod r#loop;
pub mod plan;
pub mod queue;
pub mod reconciler;
pub mod status;
pub mod types;

pub use config::{DEFAULT_FINALIZER, LoopConfig, ReconcilerConfig, ReferenceStrategyKind};
pub use error::{OutputCause, OutputFailure, ReconcileError, Result, SpecError};
pub use r#loop::{ControllerLoop, LoopStopper, keys_for_event};
pub use plan::{Payload, PlannedOutput, plan_outputs, validate_outputs};
pub use queue::WorkQueue;
pub use reconciler::Reconciler;
pub use status::output_hash;
pub use types::{AppliedOutput, Outcome, ReconcileResult, RetryPolicy, SyncReason};
