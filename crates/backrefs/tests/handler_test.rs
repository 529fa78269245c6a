//! Back-reference handler against the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use refract_backrefs::{
    AnnotationReferences, BackReferencesHandler, CombinedReferences, OwnerReferences,
    ReferenceOwner,
};
use refract_core::{ConfigMap, Kind, ObjectKey, Resource, Secret, SecretTransform};
use refract_store::{InMemoryStore, ResourceStore};

async fn setup() -> (Arc<InMemoryStore>, SecretTransform) {
    let store = InMemoryStore::new_arc();
    store
        .create(Secret::new("ns", "a").with_entry("k", b"v".to_vec()).into())
        .await
        .unwrap();
    store
        .create(ConfigMap::new("ns", "b").with_entry("k", "v").into())
        .await
        .unwrap();
    let created = store
        .create(SecretTransform::new("ns", "t").into())
        .await
        .unwrap();
    (store, SecretTransform::try_from(created).unwrap())
}

fn secret_a() -> ObjectKey {
    ObjectKey::new(Kind::Secret, "ns", "a")
}

fn config_b() -> ObjectKey {
    ObjectKey::new(Kind::ConfigMap, "ns", "b")
}

#[tokio::test]
async fn test_links_desired_targets() {
    let (store, mut owner) = setup().await;
    let handler = BackReferencesHandler::new(Arc::clone(&store), Arc::new(OwnerReferences));

    let diff = handler
        .update_references(&mut owner, &[secret_a(), config_b()])
        .await
        .unwrap();
    assert_eq!(diff.added.len(), 2);
    assert!(diff.missing.is_empty());
    assert_eq!(owner.status_references().len(), 2);

    let a = store.get(&secret_a()).await.unwrap();
    assert!(a.meta().owner_references.iter().any(|r| r.refers_to(&owner.identity())));

    let again = handler
        .update_references(&mut owner, &[config_b(), secret_a()])
        .await
        .unwrap();
    assert!(again.is_unchanged());
    assert_eq!(again.retained.len(), 2);
}

#[tokio::test]
async fn test_removed_target_loses_link() {
    let (store, mut owner) = setup().await;
    let handler = BackReferencesHandler::new(Arc::clone(&store), Arc::new(OwnerReferences));
    handler
        .update_references(&mut owner, &[secret_a(), config_b()])
        .await
        .unwrap();

    let diff = handler.update_references(&mut owner, &[config_b()]).await.unwrap();
    assert_eq!(diff.removed, vec![secret_a()]);
    assert_eq!(owner.status_references(), vec![config_b()]);
    let a = store.get(&secret_a()).await.unwrap();
    assert!(a.meta().owner_references.is_empty());
    let b = store.get(&config_b()).await.unwrap();
    assert_eq!(b.meta().owner_references.len(), 1);
}

#[tokio::test]
async fn test_missing_target_is_recorded_not_fatal() {
    let (store, mut owner) = setup().await;
    let handler = BackReferencesHandler::new(Arc::clone(&store), Arc::new(OwnerReferences));
    let gone = ObjectKey::new(Kind::Secret, "ns", "gone");

    let diff = handler
        .update_references(&mut owner, &[secret_a(), gone.clone()])
        .await
        .unwrap();
    assert_eq!(diff.missing, vec![gone.clone()]);
    assert_eq!(owner.status_references(), vec![secret_a(), gone]);

    let cleared = handler.update_references(&mut owner, &[]).await.unwrap();
    assert_eq!(cleared.removed.len(), 2);
    assert_eq!(cleared.missing.len(), 1);
    assert!(owner.status_references().is_empty());
}

#[tokio::test]
async fn test_annotation_strategy_crosses_namespaces() {
    let (store, mut owner) = setup().await;
    store
        .create(Resource::from(Secret::new("shared", "s")))
        .await
        .unwrap();
    let shared = ObjectKey::new(Kind::Secret, "shared", "s");
    let handler = BackReferencesHandler::new(
        Arc::clone(&store),
        Arc::new(CombinedReferences::new("refract.dev")),
    );

    handler
        .update_references(&mut owner, &[secret_a(), shared.clone()])
        .await
        .unwrap();
    let s = store.get(&shared).await.unwrap();
    assert_eq!(
        s.meta().annotations.get("secrettransform.refract.dev/ns/t").map(String::as_str),
        Some("true")
    );
    assert!(s.meta().owner_references.is_empty());

    handler.update_references(&mut owner, &[]).await.unwrap();
    let s = store.get(&shared).await.unwrap();
    assert!(s.meta().annotations.is_empty());
}

#[tokio::test]
async fn test_annotations_do_not_cascade() {
    let (store, mut owner) = setup().await;
    let handler = BackReferencesHandler::new(
        Arc::clone(&store),
        Arc::new(AnnotationReferences::new("refract.dev")),
    );
    handler.update_references(&mut owner, &[secret_a()]).await.unwrap();

    store
        .delete(&ObjectKey::new(Kind::SecretTransform, "ns", "t"))
        .await
        .unwrap();
    assert!(store.get(&secret_a()).await.is_ok());
}

#[tokio::test]
async fn test_persisted_foreign_reference_is_unlinked_after_reload() {
    let (store, mut owner) = setup().await;
    store
        .create(Resource::from(Secret::new("shared", "s")))
        .await
        .unwrap();
    let shared = ObjectKey::new(Kind::Secret, "shared", "s");
    let handler = BackReferencesHandler::new(
        Arc::clone(&store),
        Arc::new(AnnotationReferences::new("refract.dev")),
    );

    handler
        .update_references(&mut owner, &[shared.clone()])
        .await
        .unwrap();
    let written = store.update_status(owner.into()).await.unwrap();

    let mut reloaded = SecretTransform::try_from(written).unwrap();
    assert_eq!(reloaded.status_references(), vec![shared.clone()]);

    let diff = handler.update_references(&mut reloaded, &[]).await.unwrap();
    assert_eq!(diff.removed, vec![shared.clone()]);
    assert!(diff.missing.is_empty());
    let s = store.get(&shared).await.unwrap();
    assert!(s.meta().annotations.is_empty());
}
