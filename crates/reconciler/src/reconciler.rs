//! The per-transform reconciliation pass.

use std::sync::Arc;

use refract_backrefs::{BackReferencesHandler, ReferenceOwner};
use refract_core::{
    CONDITION_SYNCED, Condition, ConditionStatus, Kind, ObjectIdentity, ObjectKey, Output,
    Resource, SecretTransform, SecretTransformStatus,
};
use refract_store::{OperationResult, ResourceStore, StoreError, create_or_update};
use refract_transform::{InputScope, TransformEngine};
use tracing::{debug, info, warn};

use crate::config::ReconcilerConfig;
use crate::error::{ReconcileError, Result};
use crate::inputs::{resolve_inputs, validate_inputs};
use crate::plan::{PlannedOutput, plan_outputs, validate_outputs};
use crate::status::{apply_outcome, output_hash};
use crate::types::{AppliedOutput, Outcome, ReconcileResult};

/// Converges one `SecretTransform` per call.
///
/// Passes for different transforms may run concurrently; callers must not
/// run two passes for the same transform at once.
pub struct Reconciler<S: ?Sized> {
    store: Arc<S>,
    engine: TransformEngine,
    references: BackReferencesHandler<S>,
    config: ReconcilerConfig,
}

impl<S: ResourceStore + ?Sized> Reconciler<S> {
    pub fn new(store: Arc<S>, config: ReconcilerConfig) -> Self {
        let references = BackReferencesHandler::new(Arc::clone(&store), config.strategy());
        Self {
            engine: TransformEngine::new(config.query_timeout()),
            store,
            references,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub const fn engine(&self) -> &TransformEngine {
        &self.engine
    }

    /// Run one pass for the transform at `key`.
    ///
    /// Failures are recorded on the `Synced` condition before being returned.
    ///
    /// # Errors
    ///
    /// Returns the [`ReconcileError`] that stopped the pass; use
    /// [`ReconcileError::retry`] to decide when to try again.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult> {
        info!(transform = %key, "Reconciling SecretTransform");

        let mut transform = match self.store.get(key).await {
            Ok(Resource::SecretTransform(transform)) => transform,
            Ok(other) => {
                return Err(ReconcileError::Load {
                    key: key.clone(),
                    source: StoreError::from(refract_core::Error::kind_mismatch(
                        Kind::SecretTransform,
                        other.kind(),
                    )),
                });
            }
            Err(e) if e.is_not_found() => {
                debug!(transform = %key, "SecretTransform is gone");
                return Ok(ReconcileResult::new(key.clone(), Outcome::Gone));
            }
            Err(source) => {
                return Err(ReconcileError::Load {
                    key: key.clone(),
                    source,
                });
            }
        };

        if transform.metadata.is_deleting() {
            if !transform.metadata.has_finalizer(&self.config.finalizer) {
                debug!(transform = %key, "Deletion in progress, nothing to clean up");
                return Ok(ReconcileResult::new(key.clone(), Outcome::Deleting));
            }
            return self.finalize(transform).await;
        }

        let previous = transform.status.clone();
        match self.sync(&mut transform).await {
            Ok((outputs, hash)) => {
                let condition = Condition::new(CONDITION_SYNCED, ConditionStatus::True, "", "");
                let status_updated = self
                    .write_status(&mut transform, &previous, condition, Some(hash), false)
                    .await?;
                Ok(ReconcileResult::synced(key.clone(), outputs, status_updated))
            }
            Err(err) => Err(self.record_failure(&mut transform, &previous, err).await),
        }
    }

    /// Put `err` on the `Synced` condition and hand it back.
    async fn record_failure(
        &self,
        transform: &mut SecretTransform,
        previous: &SecretTransformStatus,
        err: ReconcileError,
    ) -> ReconcileError {
        let key = transform.key();
        let condition = Condition::new(
            CONDITION_SYNCED,
            ConditionStatus::False,
            err.reason().as_str(),
            err.to_string(),
        );
        if let Err(status_err) = self.write_status(transform, previous, condition, None, true).await {
            warn!(transform = %key, error = %status_err, "Failed to record failure");
        }
        warn!(transform = %key, reason = %err.reason(), error = %err, "Reconcile failed");
        err
    }

    /// Resolve, link, plan, then write. Returns the writes and the output hash.
    async fn sync(&self, transform: &mut SecretTransform) -> Result<(Vec<AppliedOutput>, String)> {
        let namespace = transform.metadata.namespace.clone();
        let inputs = validate_inputs(&namespace, &transform.spec.input)?;
        validate_outputs(&transform.spec.output)?;
        let scope = resolve_inputs(self.store.as_ref(), &inputs).await?;

        self.ensure_finalizer(transform).await?;
        let desired: Vec<ObjectKey> = inputs.into_iter().map(|(_, key)| key).collect();
        let diff = self.references.update_references(transform, &desired).await?;
        if !diff.missing.is_empty() {
            warn!(
                transform = %transform.key(),
                missing = ?diff.missing,
                "Some back-reference targets no longer exist"
            );
        }

        let planned = self.plan(scope, &namespace, &transform.spec.output).await?;
        let owner = transform.identity();
        let mut applied = Vec::with_capacity(planned.len());
        for output in &planned {
            applied.push(self.write_output(output, &owner).await?);
        }
        Ok((applied, output_hash(&planned)))
    }

    /// Evaluate every rule on the blocking pool, off the runtime's threads.
    async fn plan(&self, scope: InputScope, namespace: &str, rules: &[Output]) -> Result<Vec<PlannedOutput>> {
        let engine = self.engine.clone();
        let namespace = namespace.to_string();
        let rules = rules.to_vec();
        tokio::task::spawn_blocking(move || plan_outputs(&engine, &scope, &namespace, &rules))
            .await
            .map_err(|e| ReconcileError::Plan {
                reason: e.to_string(),
            })?
    }

    async fn ensure_finalizer(&self, transform: &mut SecretTransform) -> Result<()> {
        if !transform.metadata.add_finalizer(&self.config.finalizer) {
            return Ok(());
        }
        let key = transform.key();
        let updated = self
            .store
            .update(Resource::SecretTransform(transform.clone()))
            .await
            .map_err(|source| ReconcileError::Update {
                key: key.clone(),
                source,
            })?;
        transform.metadata = updated.meta().clone();
        debug!(transform = %key, finalizer = %self.config.finalizer, "Added finalizer");
        Ok(())
    }

    async fn write_output(&self, output: &PlannedOutput, owner: &ObjectIdentity) -> Result<AppliedOutput> {
        let (result, _) = create_or_update(self.store.as_ref(), &output.key, |resource| {
            output.apply(resource, owner)
        })
        .await
        .map_err(|source| ReconcileError::Write {
            key: output.key.clone(),
            source,
        })?;

        match result {
            OperationResult::Created => info!(output = %output.key, "Created output"),
            OperationResult::Updated => info!(output = %output.key, "Updated output"),
            OperationResult::Unchanged => debug!(output = %output.key, "Output unchanged"),
        }
        Ok(AppliedOutput {
            key: output.key.clone(),
            result,
        })
    }

    /// Persist the status when it changed, or always when `force` is set.
    /// Returns whether it changed.
    async fn write_status(
        &self,
        transform: &mut SecretTransform,
        previous: &SecretTransformStatus,
        condition: Condition,
        hash: Option<String>,
        force: bool,
    ) -> Result<bool> {
        let generation = transform.metadata.generation;
        let changed = apply_outcome(&mut transform.status, previous, generation, condition, hash);
        if !changed && !force {
            debug!(transform = %transform.key(), "Status unchanged");
            return Ok(false);
        }

        let key = transform.key();
        let written = self
            .store
            .update_status(Resource::SecretTransform(transform.clone()))
            .await
            .map_err(|source| ReconcileError::Update {
                key: key.clone(),
                source,
            })?;
        transform.metadata = written.meta().clone();
        if changed {
            debug!(transform = %key, hash = %transform.status.output_hash, "Updated status");
        }
        Ok(changed)
    }

    /// Drop every back-reference, then release the finalizer.
    async fn finalize(&self, mut transform: SecretTransform) -> Result<ReconcileResult> {
        let key = transform.key();
        let previous = transform.status.clone();
        match self.release(&mut transform).await {
            Ok(()) => {
                info!(transform = %key, "Removed finalizer");
                Ok(ReconcileResult::new(key, Outcome::Finalized))
            }
            Err(err) => Err(self.record_failure(&mut transform, &previous, err).await),
        }
    }

    async fn release(&self, transform: &mut SecretTransform) -> Result<()> {
        self.references.update_references(transform, &[]).await?;

        let mut released = transform.clone();
        released.metadata.remove_finalizer(&self.config.finalizer);
        match self.store.update(Resource::SecretTransform(released)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(source) => Err(ReconcileError::Update {
                key: transform.key(),
                source,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use refract_core::{ConfigMap, InputRef, Output};
    use refract_store::{InMemoryStore, StoreSubscription};

    use crate::types::SyncReason;

    /// Refuses ConfigMap updates while `locked` is set.
    struct LockedConfigMaps {
        inner: Arc<InMemoryStore>,
        locked: AtomicBool,
    }

    #[async_trait]
    impl ResourceStore for LockedConfigMaps {
        async fn get(&self, key: &ObjectKey) -> refract_store::Result<Resource> {
            self.inner.get(key).await
        }

        async fn list(&self, kind: Kind, namespace: Option<&str>) -> refract_store::Result<Vec<Resource>> {
            self.inner.list(kind, namespace).await
        }

        async fn create(&self, resource: Resource) -> refract_store::Result<Resource> {
            self.inner.create(resource).await
        }

        async fn update(&self, resource: Resource) -> refract_store::Result<Resource> {
            if self.locked.load(Ordering::SeqCst) && resource.kind() == Kind::ConfigMap {
                return Err(StoreError::invalid("config maps are locked"));
            }
            self.inner.update(resource).await
        }

        async fn update_status(&self, resource: Resource) -> refract_store::Result<Resource> {
            self.inner.update_status(resource).await
        }

        async fn delete(&self, key: &ObjectKey) -> refract_store::Result<()> {
            self.inner.delete(key).await
        }

        fn subscribe(&self) -> StoreSubscription {
            self.inner.subscribe()
        }
    }

    async fn seeded(transform: SecretTransform) -> (Arc<InMemoryStore>, Reconciler<InMemoryStore>, ObjectKey) {
        let store = InMemoryStore::new_arc();
        store
            .create(ConfigMap::new("ns", "cfg").with_entry("x", "v1").into())
            .await
            .unwrap();
        let key = transform.key();
        store.create(transform.into()).await.unwrap();
        let reconciler = Reconciler::new(Arc::clone(&store), ReconcilerConfig::default());
        (store, reconciler, key)
    }

    fn transform() -> SecretTransform {
        let mut transform = SecretTransform::new("ns", "t");
        transform
            .spec
            .input
            .insert("cfg".into(), InputRef::config_map("cfg"));
        transform
            .spec
            .output
            .push(Output::config_map("out").with_field("y", ".cfg.x.string"));
        transform
    }

    async fn load(store: &InMemoryStore, key: &ObjectKey) -> SecretTransform {
        SecretTransform::try_from(store.get(key).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_transform_is_gone() {
        let store = InMemoryStore::new_arc();
        let reconciler = Reconciler::new(Arc::clone(&store), ReconcilerConfig::default());
        let key = ObjectKey::new(Kind::SecretTransform, "ns", "absent");
        let result = reconciler.reconcile(&key).await.unwrap();
        assert_eq!(result.outcome, Outcome::Gone);
    }

    #[tokio::test]
    async fn test_sync_writes_output_and_status() {
        let (store, reconciler, key) = seeded(transform()).await;
        let result = reconciler.reconcile(&key).await.unwrap();
        assert_eq!(result.outcome, Outcome::Synced);
        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.outputs[0].result, OperationResult::Created);
        assert!(result.status_updated);

        let out = ConfigMap::try_from(
            store
                .get(&ObjectKey::new(Kind::ConfigMap, "ns", "out"))
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(out.data.get("y").map(String::as_str), Some("v1"));

        let stored = load(&store, &key).await;
        assert!(stored.metadata.has_finalizer("refract.dev/clearbackrefs"));
        let synced = stored.status.condition(CONDITION_SYNCED).unwrap();
        assert!(synced.is_true());
        assert!(synced.reason.is_empty());
        assert_eq!(stored.status.observed_generation, stored.metadata.generation);
        assert_eq!(stored.status.output_hash.len(), 64);
    }

    #[tokio::test]
    async fn test_second_pass_converges() {
        let (_store, reconciler, key) = seeded(transform()).await;
        reconciler.reconcile(&key).await.unwrap();
        let second = reconciler.reconcile(&key).await.unwrap();
        assert!(second.converged());
    }

    #[tokio::test]
    async fn test_invalid_output_is_recorded() {
        let mut bad = transform();
        bad.spec.output.push(Output::secret("s"));
        let (store, reconciler, key) = seeded(bad).await;

        let err = reconciler.reconcile(&key).await.unwrap_err();
        assert_eq!(err.to_string(), "output 1: no transformation specified");

        let stored = load(&store, &key).await;
        let synced = stored.status.condition(CONDITION_SYNCED).unwrap();
        assert_eq!(synced.status, ConditionStatus::False);
        assert_eq!(synced.reason, "InvalidSpec");
        assert_eq!(synced.message, "output 1: no transformation specified");
        assert!(stored.status.output_hash.is_empty());
        // Rejected before anything was written.
        assert!(stored.metadata.finalizers.is_empty());
        assert!(store.get(&ObjectKey::new(Kind::ConfigMap, "ns", "out")).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_hash() {
        let (store, reconciler, key) = seeded(transform()).await;
        reconciler.reconcile(&key).await.unwrap();
        let hash = load(&store, &key).await.status.output_hash;

        let mut edited = load(&store, &key).await;
        edited.spec.output[0]
            .transformation
            .insert("z".into(), ".cfg.x.string | tonumber".into());
        store.update(edited.into()).await.unwrap();

        let err = reconciler.reconcile(&key).await.unwrap_err();
        assert!(err.to_string().starts_with("output 0: z: "));
        let stored = load(&store, &key).await;
        assert_eq!(stored.status.output_hash, hash);
        assert_eq!(stored.status.observed_generation, stored.metadata.generation);
    }

    #[tokio::test]
    async fn test_finalize_failure_is_recorded() {
        let inner = InMemoryStore::new_arc();
        inner
            .create(ConfigMap::new("ns", "cfg").with_entry("x", "v1").into())
            .await
            .unwrap();
        let key = transform().key();
        inner.create(transform().into()).await.unwrap();
        let store = Arc::new(LockedConfigMaps {
            inner: Arc::clone(&inner),
            locked: AtomicBool::new(false),
        });
        let reconciler = Reconciler::new(Arc::clone(&store), ReconcilerConfig::default());
        reconciler.reconcile(&key).await.unwrap();

        inner.delete(&key).await.unwrap();
        store.locked.store(true, Ordering::SeqCst);
        let err = reconciler.reconcile(&key).await.unwrap_err();
        assert_eq!(err.reason(), SyncReason::Failed);

        let stored = load(&inner, &key).await;
        assert!(stored.metadata.has_finalizer("refract.dev/clearbackrefs"));
        let synced = stored.status.condition(CONDITION_SYNCED).unwrap();
        assert_eq!(synced.status, ConditionStatus::False);
        assert_eq!(synced.reason, "Failed");
        assert_eq!(synced.message, err.to_string());

        store.locked.store(false, Ordering::SeqCst);
        let result = reconciler.reconcile(&key).await.unwrap();
        assert_eq!(result.outcome, Outcome::Finalized);
        assert!(inner.get(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_slow_queries_do_not_hold_the_runtime() {
        let mut slow = transform();
        slow.spec.output[0]
            .transformation
            .insert("n".into(), "reduce range(1e12) as $i (0; . + 1)".into());
        let (store, _, key) = seeded(slow).await;
        let config = ReconcilerConfig {
            query_timeout_ms: 1_000,
            ..ReconcilerConfig::default()
        };
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&store), config));
        let pass = {
            let reconciler = Arc::clone(&reconciler);
            let key = key.clone();
            tokio::spawn(async move { reconciler.reconcile(&key).await })
        };

        // The test runtime has a single thread; it keeps ticking while the query runs.
        let mut ticks: u32 = 0;
        while !pass.is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ticks = ticks.saturating_add(1);
        }
        assert!(ticks >= 10, "runtime stalled, only {ticks} ticks");

        let err = pass.await.unwrap().unwrap_err();
        assert_eq!(err.reason(), SyncReason::InvalidSpec);
        assert!(err.to_string().starts_with("output 0: n: "));
        assert!(err.to_string().contains("timed out after 1000ms"));
    }
}
