//! Reconciling an owner's recorded reference set against the desired one.

use std::collections::BTreeSet;
use std::sync::Arc;

use refract_core::{Kind, ManagedReference, ObjectIdentity, ObjectKey, ObjectMeta, SecretTransform};
use refract_store::{ResourceStore, StoreError};
use tracing::{debug, warn};

use crate::error::Result;
use crate::strategy::BackReferenceStrategy;

/// Attempts per target before a write conflict is reported.
const CONFLICT_RETRIES: usize = 3;

/// An object that records which targets it links to.
pub trait ReferenceOwner {
    fn identity(&self) -> ObjectIdentity;

    /// Targets recorded by the previous pass.
    fn status_references(&self) -> Vec<ObjectKey>;

    fn set_status_references(&mut self, references: &[ObjectKey]);
}

impl ReferenceOwner for SecretTransform {
    fn identity(&self) -> ObjectIdentity {
        ObjectIdentity::from_meta(Kind::SecretTransform, &self.metadata)
    }

    fn status_references(&self) -> Vec<ObjectKey> {
        self.status
            .managed_references
            .iter()
            .map(|r| r.key(&self.metadata.namespace))
            .collect()
    }

    fn set_status_references(&mut self, references: &[ObjectKey]) {
        self.status.managed_references = references
            .iter()
            .map(|key| ManagedReference::for_target(key, &self.metadata.namespace))
            .collect();
    }
}

/// What [`BackReferencesHandler::update_references`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceDiff {
    pub added: Vec<ObjectKey>,
    pub removed: Vec<ObjectKey>,
    pub retained: Vec<ObjectKey>,
    /// Targets that no longer exist; skipped without error.
    pub missing: Vec<ObjectKey>,
}

impl ReferenceDiff {
    /// Whether the recorded set already matched.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Set difference between recorded and desired targets, sorted and deduplicated.
#[must_use]
pub fn diff_references(previous: &[ObjectKey], desired: &[ObjectKey]) -> ReferenceDiff {
    let previous: BTreeSet<&ObjectKey> = previous.iter().collect();
    let desired: BTreeSet<&ObjectKey> = desired.iter().collect();
    ReferenceDiff {
        added: desired.difference(&previous).map(|k| (*k).clone()).collect(),
        removed: previous.difference(&desired).map(|k| (*k).clone()).collect(),
        retained: desired.intersection(&previous).map(|k| (*k).clone()).collect(),
        missing: Vec::new(),
    }
}

#[derive(Clone, Copy)]
enum Change {
    Add,
    Remove,
}

/// Applies reference changes to targets through the store.
pub struct BackReferencesHandler<S: ?Sized> {
    store: Arc<S>,
    strategy: Arc<dyn BackReferenceStrategy>,
}

impl<S: ?Sized> Clone for BackReferencesHandler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            strategy: Arc::clone(&self.strategy),
        }
    }
}

impl<S: ResourceStore + ?Sized> BackReferencesHandler<S> {
    pub fn new(store: Arc<S>, strategy: Arc<dyn BackReferenceStrategy>) -> Self {
        Self { store, strategy }
    }

    #[must_use]
    pub fn strategy(&self) -> &dyn BackReferenceStrategy {
        self.strategy.as_ref()
    }

    /// Link `owner` to exactly `desired`, then record `desired` on the owner.
    ///
    /// The owner is only modified in memory; persisting its status is up to
    /// the caller. Targets that have disappeared are reported in
    /// [`ReferenceDiff::missing`] and the desired set is recorded anyway.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BackrefError::Store`] when reading or writing a
    /// target fails for any reason other than it being gone.
    pub async fn update_references<O>(
        &self,
        owner: &mut O,
        desired: &[ObjectKey],
    ) -> Result<ReferenceDiff>
    where
        O: ReferenceOwner + Send + Sync,
    {
        let identity = owner.identity();
        let mut diff = diff_references(&owner.status_references(), desired);

        for key in &diff.added {
            if !self.apply(key, &identity, Change::Add).await? {
                diff.missing.push(key.clone());
            }
        }
        for key in &diff.removed {
            if !self.apply(key, &identity, Change::Remove).await? {
                diff.missing.push(key.clone());
            }
        }

        let recorded: Vec<ObjectKey> = desired
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect();
        owner.set_status_references(&recorded);

        if !diff.is_unchanged() {
            debug!(
                owner = %identity.key(),
                added = diff.added.len(),
                removed = diff.removed.len(),
                missing = diff.missing.len(),
                "Updated back-references"
            );
        }
        Ok(diff)
    }

    /// Apply one change to a target. Returns `false` when the target is gone.
    async fn apply(&self, key: &ObjectKey, owner: &ObjectIdentity, change: Change) -> Result<bool> {
        let mut attempt: usize = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let mut target = match self.store.get(key).await {
                Ok(target) => target,
                Err(e) if e.is_not_found() => {
                    warn!(target = %key, owner = %owner.key(), "Back-reference target not found");
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            };
            if !self.mutate(target.meta_mut(), owner, change) {
                return Ok(true);
            }
            match self.store.update(target).await {
                Ok(_) => return Ok(true),
                Err(e) if e.is_not_found() => {
                    warn!(target = %key, owner = %owner.key(), "Back-reference target disappeared");
                    return Ok(false);
                }
                Err(StoreError::Conflict { .. }) if attempt < CONFLICT_RETRIES => {
                    debug!(target = %key, attempt, "Retrying back-reference after conflict");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn mutate(&self, meta: &mut ObjectMeta, owner: &ObjectIdentity, change: Change) -> bool {
        match change {
            Change::Add => self.strategy.add_reference(meta, owner),
            Change::Remove => self.strategy.del_reference(meta, owner),
        }
    }
}
