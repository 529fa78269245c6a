//! Change notifications.

use refract_core::{ObjectKey, Resource};
use tokio::sync::broadcast;

use crate::error::{Result, StoreError};

/// What happened to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Added,
    Modified,
    Deleted,
}

/// A change notification carrying the object state after the change
/// (the last known state for deletions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub action: EventAction,
    pub object: Resource,
}

impl StoreEvent {
    /// Create an event.
    #[must_use]
    pub const fn new(action: EventAction, object: Resource) -> Self {
        Self { action, object }
    }

    /// Key of the changed object.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.object.key()
    }
}

/// Subscription handle for receiving change notifications.
pub struct StoreSubscription {
    receiver: broadcast::Receiver<StoreEvent>,
}

impl StoreSubscription {
    /// Wrap a broadcast receiver.
    #[must_use]
    pub const fn new(receiver: broadcast::Receiver<StoreEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next notification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Lagged`] when notifications were dropped, after which
    /// the subscriber should re-list, and [`StoreError::Closed`] when the store is gone.
    pub async fn recv(&mut self) -> Result<StoreEvent> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(skipped) => StoreError::Lagged { skipped },
            broadcast::error::RecvError::Closed => StoreError::Closed,
        })
    }

    /// Try to receive a notification without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] when nothing is pending or the store is gone.
    pub fn try_recv(&mut self) -> Result<StoreEvent> {
        self.receiver.try_recv().map_err(|_| StoreError::Closed)
    }
}
