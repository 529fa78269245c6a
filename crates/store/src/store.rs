//! Resource store trait and implementations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use refract_core::{Kind, ObjectIdentity, ObjectKey, Resource};
use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use ulid::Ulid;

use crate::error::{Result, StoreError};
use crate::event::{EventAction, StoreEvent, StoreSubscription};

/// Trait for resource storage backends.
///
/// Consistency is the store's job: updates carry the `resourceVersion` they
/// were read at and are rejected with [`StoreError::Conflict`] when stale.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch an object.
    async fn get(&self, key: &ObjectKey) -> Result<Resource>;

    /// List objects of a kind, optionally restricted to a namespace.
    async fn list(&self, kind: Kind, namespace: Option<&str>) -> Result<Vec<Resource>>;

    /// Create an object.
    async fn create(&self, resource: Resource) -> Result<Resource>;

    /// Replace an object's metadata and payload. The status is left untouched.
    async fn update(&self, resource: Resource) -> Result<Resource>;

    /// Replace the status of a `SecretTransform`.
    async fn update_status(&self, resource: Resource) -> Result<Resource>;

    /// Delete an object, honouring its finalizers.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> StoreSubscription;
}

/// In-memory resource store.
///
/// Removing an object garbage-collects its dependents: objects whose owner
/// references all pointed at removed owners are deleted in cascade, surviving
/// objects lose their dangling references.
pub struct InMemoryStore {
    objects: RwLock<BTreeMap<ObjectKey, Resource>>,
    last_version: AtomicU64,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1000);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            last_version: AtomicU64::new(0),
            events,
        }
    }

    /// Create a new in-memory store wrapped in an Arc.
    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Snapshot of every stored object in key order.
    pub async fn snapshot(&self) -> Vec<Resource> {
        self.objects.read().await.values().cloned().collect()
    }

    fn next_version(&self) -> u64 {
        self.last_version
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }

    fn notify(&self, action: EventAction, object: &Resource) {
        // No subscribers is fine.
        let _ = self.events.send(StoreEvent::new(action, object.clone()));
    }

    fn store_modified(&self, objects: &mut BTreeMap<ObjectKey, Resource>, mut object: Resource) -> Resource {
        object.meta_mut().resource_version = self.next_version();
        objects.insert(object.key(), object.clone());
        self.notify(EventAction::Modified, &object);
        object
    }

    /// Delete dependents of removed owners until nothing else becomes orphaned.
    fn collect_garbage(&self, objects: &mut BTreeMap<ObjectKey, Resource>, removed: ObjectIdentity) {
        let mut pending = vec![removed];
        while let Some(owner) = pending.pop() {
            let dependents: Vec<ObjectKey> = objects
                .iter()
                .filter(|(key, object)| {
                    key.namespace == owner.namespace
                        && object
                            .meta()
                            .owner_references
                            .iter()
                            .any(|r| r.refers_to(&owner))
                })
                .map(|(key, _)| key.clone())
                .collect();

            for key in dependents {
                let Some(mut object) = objects.remove(&key) else {
                    continue;
                };
                object
                    .meta_mut()
                    .owner_references
                    .retain(|r| !r.refers_to(&owner));

                if !object.meta().owner_references.is_empty() {
                    debug!(object = %key, owner = %owner.key(), "Dropping dangling owner reference");
                    self.store_modified(objects, object);
                    continue;
                }

                debug!(object = %key, owner = %owner.key(), "Garbage collecting dependent");
                if object.meta().finalizers.is_empty() {
                    self.notify(EventAction::Deleted, &object);
                    pending.push(object.identity());
                } else {
                    if !object.meta().is_deleting() {
                        object.meta_mut().deletion_timestamp = Some(Utc::now());
                    }
                    self.store_modified(objects, object);
                }
            }
        }
    }

    fn check_version(key: &ObjectKey, incoming: &Resource, stored: &Resource) -> Result<()> {
        let expected = incoming.meta().resource_version;
        let actual = stored.meta().resource_version;
        if expected != 0 && expected != actual {
            return Err(StoreError::conflict(key, expected, actual));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Resource> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn list(&self, kind: Kind, namespace: Option<&str>) -> Result<Vec<Resource>> {
        Ok(self
            .objects
            .read()
            .await
            .iter()
            .filter(|(key, _)| key.kind == kind && namespace.is_none_or(|ns| key.namespace == ns))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(&self, mut resource: Resource) -> Result<Resource> {
        resource.validate()?;
        let key = resource.key();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::already_exists(&key));
        }

        let version = self.next_version();
        let meta = resource.meta_mut();
        if meta.uid.is_empty() {
            meta.uid = Ulid::new().to_string();
        }
        meta.generation = 1;
        meta.resource_version = version;
        meta.deletion_timestamp = None;
        if let Resource::SecretTransform(transform) = &mut resource {
            transform.status = refract_core::SecretTransformStatus::default();
        }

        objects.insert(key, resource.clone());
        self.notify(EventAction::Added, &resource);
        Ok(resource)
    }

    async fn update(&self, mut resource: Resource) -> Result<Resource> {
        resource.validate()?;
        let key = resource.key();
        let mut objects = self.objects.write().await;
        let stored = objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(&key))?;
        Self::check_version(&key, &resource, &stored)?;

        {
            let (meta, previous) = (resource.meta_mut(), stored.meta());
            meta.uid.clone_from(&previous.uid);
            meta.deletion_timestamp = previous.deletion_timestamp;
            meta.resource_version = previous.resource_version;
            meta.generation = previous.generation;
        }
        if let (Resource::SecretTransform(next), Resource::SecretTransform(previous)) =
            (&mut resource, &stored)
        {
            next.status = previous.status.clone();
        }
        if !resource.same_content(&stored) {
            let generation = stored.meta().generation.saturating_add(1);
            resource.meta_mut().generation = generation;
        }
        if resource == stored {
            return Ok(stored);
        }

        if resource.meta().is_deleting() && resource.meta().finalizers.is_empty() {
            objects.remove(&key);
            self.notify(EventAction::Deleted, &resource);
            self.collect_garbage(&mut objects, resource.identity());
            return Ok(resource);
        }

        Ok(self.store_modified(&mut objects, resource))
    }

    async fn update_status(&self, resource: Resource) -> Result<Resource> {
        let key = resource.key();
        let Resource::SecretTransform(incoming) = resource else {
            return Err(StoreError::invalid(format!(
                "{} has no status subresource",
                key.kind
            )));
        };
        let mut objects = self.objects.write().await;
        let stored = objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(&key))?;
        Self::check_version(&key, &Resource::SecretTransform(incoming.clone()), &stored)?;

        let Resource::SecretTransform(mut next) = stored.clone() else {
            return Err(StoreError::invalid(format!("{key} is not a SecretTransform")));
        };
        if next.status == incoming.status {
            return Ok(stored);
        }
        next.status = incoming.status;
        Ok(self.store_modified(&mut objects, Resource::SecretTransform(next)))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut objects = self.objects.write().await;
        let mut object = objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))?;

        if !object.meta().finalizers.is_empty() {
            if !object.meta().is_deleting() {
                debug!(object = %key, finalizers = ?object.meta().finalizers, "Marking object for deletion");
                object.meta_mut().deletion_timestamp = Some(Utc::now());
                self.store_modified(&mut objects, object);
            }
            return Ok(());
        }

        objects.remove(key);
        self.notify(EventAction::Deleted, &object);
        self.collect_garbage(&mut objects, object.identity());
        Ok(())
    }

    fn subscribe(&self) -> StoreSubscription {
        StoreSubscription::new(self.events.subscribe())
    }
}

/// A wrapper that adds tracing to a resource store.
pub struct TracingStore<S: ResourceStore> {
    inner: S,
}

impl<S: ResourceStore> TracingStore<S> {
    /// Create a new tracing store.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ResourceStore> ResourceStore for TracingStore<S> {
    async fn get(&self, key: &ObjectKey) -> Result<Resource> {
        tracing::trace!(object = %key, "Getting object");
        self.inner.get(key).await
    }

    async fn list(&self, kind: Kind, namespace: Option<&str>) -> Result<Vec<Resource>> {
        tracing::trace!(kind = %kind, namespace = ?namespace, "Listing objects");
        self.inner.list(kind, namespace).await
    }

    async fn create(&self, resource: Resource) -> Result<Resource> {
        tracing::debug!(object = %resource.key(), "Creating object");
        let result = self.inner.create(resource).await;
        if let Ok(ref created) = result {
            tracing::trace!(uid = %created.meta().uid, "Object created");
        }
        result
    }

    async fn update(&self, resource: Resource) -> Result<Resource> {
        tracing::debug!(
            object = %resource.key(),
            resource_version = resource.meta().resource_version,
            "Updating object"
        );
        self.inner.update(resource).await
    }

    async fn update_status(&self, resource: Resource) -> Result<Resource> {
        tracing::debug!(object = %resource.key(), "Updating status");
        self.inner.update_status(resource).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        tracing::debug!(object = %key, "Deleting object");
        self.inner.delete(key).await
    }

    fn subscribe(&self) -> StoreSubscription {
        self.inner.subscribe()
    }
}
