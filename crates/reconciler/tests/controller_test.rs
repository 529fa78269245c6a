//! Reconciler and controller loop against the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use refract_core::{
    CONDITION_SYNCED, ConditionStatus, ConfigMap, InputRef, Kind, ManagedReference, ObjectKey,
    Output, Resource, Secret, SecretOutput, SecretTransform,
};
use refract_reconciler::{
    ControllerLoop, LoopConfig, Outcome, ReconcileError, Reconciler, ReconcilerConfig,
    ReferenceStrategyKind, RetryPolicy, SyncReason,
};
use refract_store::{InMemoryStore, OperationResult, ResourceStore};
use serde_json::{Value, json};

const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

fn reconciler(store: &Arc<InMemoryStore>) -> Reconciler<InMemoryStore> {
    Reconciler::new(Arc::clone(store), ReconcilerConfig::default())
}

fn cfg_key() -> ObjectKey {
    ObjectKey::new(Kind::ConfigMap, "ns", "cfg")
}

fn secret_key() -> ObjectKey {
    ObjectKey::new(Kind::Secret, "ns", "creds")
}

fn out_key() -> ObjectKey {
    ObjectKey::new(Kind::ConfigMap, "ns", "out")
}

async fn seed_inputs(store: &InMemoryStore) {
    store
        .create(ConfigMap::new("ns", "cfg").with_entry("x", "v1").into())
        .await
        .unwrap();
    store
        .create(
            Secret::new("ns", "creds")
                .with_entry("password", b"hunter2".to_vec())
                .into(),
        )
        .await
        .unwrap();
}

fn two_input_transform() -> SecretTransform {
    let mut transform = SecretTransform::new("ns", "t");
    transform
        .spec
        .input
        .insert("cfg".into(), InputRef::config_map("cfg"));
    transform
        .spec
        .input
        .insert("creds".into(), InputRef::secret("creds"));
    transform.spec.output.push(
        Output::config_map("out")
            .with_field("y", ".cfg.x.string")
            .with_field("both", "[.cfg.x.string, .creds.password.string] | join(\"/\")"),
    );
    transform
}

async fn create(store: &InMemoryStore, transform: SecretTransform) -> ObjectKey {
    let key = transform.key();
    store.create(transform.into()).await.unwrap();
    key
}

async fn load(store: &InMemoryStore, key: &ObjectKey) -> SecretTransform {
    SecretTransform::try_from(store.get(key).await.unwrap()).unwrap()
}

async fn config_map(store: &InMemoryStore, key: &ObjectKey) -> ConfigMap {
    ConfigMap::try_from(store.get(key).await.unwrap()).unwrap()
}

fn linked(resource: &Resource, transform: &SecretTransform) -> bool {
    let owner = refract_core::ObjectIdentity::from_meta(Kind::SecretTransform, &transform.metadata);
    resource
        .meta()
        .owner_references
        .iter()
        .any(|r| !r.controller && r.refers_to(&owner))
}

#[tokio::test]
async fn test_text_output_from_text_input() {
    let store = InMemoryStore::new_arc();
    seed_inputs(&store).await;
    let mut transform = SecretTransform::new("ns", "t");
    transform
        .spec
        .input
        .insert("cfg".into(), InputRef::config_map("cfg"));
    transform
        .spec
        .output
        .push(Output::config_map("out").with_field("y", ".cfg.x.string"));
    let key = create(&store, transform).await;

    reconciler(&store).reconcile(&key).await.unwrap();

    let out = config_map(&store, &out_key()).await;
    assert_eq!(out.data.get("y").map(String::as_str), Some("v1"));
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let store = InMemoryStore::new_arc();
    seed_inputs(&store).await;
    let key = create(&store, two_input_transform()).await;
    let reconciler = reconciler(&store);

    let first = reconciler.reconcile(&key).await.unwrap();
    assert!(!first.converged());
    let after_first = load(&store, &key).await;
    let output_after_first = store.get(&out_key()).await.unwrap();

    let second = reconciler.reconcile(&key).await.unwrap();
    assert!(second.converged());
    assert_eq!(second.outputs[0].result, OperationResult::Unchanged);

    let after_second = load(&store, &key).await;
    assert_eq!(after_second, after_first);
    assert_eq!(store.get(&out_key()).await.unwrap(), output_after_first);
}

#[tokio::test]
async fn test_references_equal_declared_inputs() {
    let store = InMemoryStore::new_arc();
    seed_inputs(&store).await;

    // Start from a stale recorded set that no longer matches the spec.
    let key = create(&store, two_input_transform()).await;
    let mut stale = load(&store, &key).await;
    stale.status.managed_references = vec![ManagedReference::local(Kind::Secret, "gone")];
    store.update_status(stale.into()).await.unwrap();

    reconciler(&store).reconcile(&key).await.unwrap();

    let transform = load(&store, &key).await;
    let recorded: BTreeSet<_> = transform.status.managed_references.iter().cloned().collect();
    let expected: BTreeSet<_> = [
        ManagedReference::local(Kind::ConfigMap, "cfg"),
        ManagedReference::local(Kind::Secret, "creds"),
    ]
    .into_iter()
    .collect();
    assert_eq!(recorded, expected);
    assert!(linked(&store.get(&cfg_key()).await.unwrap(), &transform));
    assert!(linked(&store.get(&secret_key()).await.unwrap(), &transform));
}

#[tokio::test]
async fn test_removing_an_input_drops_its_link() {
    let store = InMemoryStore::new_arc();
    seed_inputs(&store).await;
    let key = create(&store, two_input_transform()).await;
    let reconciler = reconciler(&store);
    reconciler.reconcile(&key).await.unwrap();

    let mut edited = load(&store, &key).await;
    edited.spec.input.remove("creds");
    edited.spec.output = vec![Output::config_map("out").with_field("y", ".cfg.x.string")];
    store.update(edited.into()).await.unwrap();
    reconciler.reconcile(&key).await.unwrap();

    let transform = load(&store, &key).await;
    assert_eq!(
        transform.status.managed_references,
        vec![ManagedReference::local(Kind::ConfigMap, "cfg")]
    );
    assert!(linked(&store.get(&cfg_key()).await.unwrap(), &transform));
    assert!(!linked(&store.get(&secret_key()).await.unwrap(), &transform));
}

#[tokio::test]
async fn test_delete_keeps_inputs_and_removes_finalizer() {
    let store = InMemoryStore::new_arc();
    seed_inputs(&store).await;
    let key = create(&store, two_input_transform()).await;
    let reconciler = reconciler(&store);
    reconciler.reconcile(&key).await.unwrap();
    assert!(store.get(&out_key()).await.is_ok());

    store.delete(&key).await.unwrap();
    let deleting = load(&store, &key).await;
    assert!(deleting.metadata.is_deleting());

    let result = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(result.outcome, Outcome::Finalized);

    // The transform and the output it controlled are gone; inputs survive untouched.
    assert!(store.get(&key).await.unwrap_err().is_not_found());
    assert!(store.get(&out_key()).await.unwrap_err().is_not_found());

    let cfg = config_map(&store, &cfg_key()).await;
    assert_eq!(cfg.data.get("x").map(String::as_str), Some("v1"));
    assert!(cfg.metadata.owner_references.is_empty());
    let creds = Secret::try_from(store.get(&secret_key()).await.unwrap()).unwrap();
    assert_eq!(creds.data.get("password"), Some(&b"hunter2".to_vec()));
    assert!(creds.metadata.owner_references.is_empty());

    let again = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(again.outcome, Outcome::Gone);
}

#[tokio::test]
async fn test_missing_input_is_reported_and_requeued() {
    let store = InMemoryStore::new_arc();
    let key = create(&store, two_input_transform()).await;
    let reconciler = reconciler(&store);

    let err = reconciler.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::MissingInput { .. }));
    assert_eq!(err.reason(), SyncReason::MissingInput);
    assert_eq!(
        err.retry(reconciler.config().missing_input_delay()),
        RetryPolicy::After(Duration::from_secs(30))
    );

    let transform = load(&store, &key).await;
    let synced = transform.status.condition(CONDITION_SYNCED).unwrap();
    assert_eq!(synced.status, ConditionStatus::False);
    assert_eq!(synced.reason, "MissingInput");
    assert!(synced.message.contains("not found"));

    // Once the inputs appear the next pass succeeds.
    seed_inputs(&store).await;
    reconciler.reconcile(&key).await.unwrap();
    let transform = load(&store, &key).await;
    assert!(transform.status.condition(CONDITION_SYNCED).unwrap().is_true());
}

#[tokio::test]
async fn test_ambiguous_references_are_rejected_before_writes() {
    let store = InMemoryStore::new_arc();
    seed_inputs(&store).await;

    let mut ambiguous_input = two_input_transform();
    ambiguous_input.spec.input.insert(
        "both".into(),
        InputRef {
            secret: Some("creds".into()),
            config_map: Some("cfg".into()),
        },
    );
    let key = create(&store, ambiguous_input).await;
    let err = reconciler(&store).reconcile(&key).await.unwrap_err();
    assert_eq!(err.reason(), SyncReason::InvalidSpec);
    assert_eq!(err.retry(Duration::from_secs(30)), RetryPolicy::Never);
    assert_eq!(
        err.to_string(),
        "input both: configMap or secret required but both specified"
    );

    let mut ambiguous_output = two_input_transform();
    ambiguous_output.metadata.name = "t2".into();
    let mut rule = Output::config_map("other").with_field("k", ".");
    rule.secret = Some(SecretOutput {
        name: "other".into(),
        secret_type: None,
    });
    ambiguous_output.spec.output.push(rule);
    let key2 = create(&store, ambiguous_output).await;
    let err = reconciler(&store).reconcile(&key2).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "output 1: configMap or secret required but both specified"
    );

    // Neither pass touched the inputs or wrote an output.
    assert!(store.get(&out_key()).await.is_err());
    let cfg = store.get(&cfg_key()).await.unwrap();
    assert!(cfg.meta().owner_references.is_empty());
    assert!(load(&store, &key).await.metadata.finalizers.is_empty());
    assert!(load(&store, &key2).await.metadata.finalizers.is_empty());
}

#[tokio::test]
async fn test_docker_auths_are_merged_and_decoded() {
    let store = InMemoryStore::new_arc();
    let mut transform = SecretTransform::new("ns", "makisu");
    for i in 0..2 {
        let auth = STANDARD.encode(format!("user{i}:pass{i}"));
        let payload = format!(r#"{{"auths": {{"registry{i}.example.org": {{"auth": "{auth}"}}}}}}"#);
        store
            .create(
                Secret::new("ns", format!("secret{i}"))
                    .with_entry(DOCKER_CONFIG_KEY, payload.into_bytes())
                    .into(),
            )
            .await
            .unwrap();
        transform
            .spec
            .input
            .insert(format!("secret{i}"), InputRef::secret(format!("secret{i}")));
    }
    transform.spec.output.push(Output {
        secret: Some(SecretOutput {
            name: "makisu-conf".into(),
            secret_type: None,
        }),
        config_map: None,
        transformation: [(
            "makisu.conf".to_string(),
            r#"(.secret0[".dockerconfigjson"].object.auths * .secret1[".dockerconfigjson"].object.auths) | with_entries(.value |= {".*": {security: {basic: .auth | @base64d | split(":") | {username: .[0], password: .[1]}}}})"#
                .to_string(),
        )]
        .into_iter()
        .collect(),
    });
    let key = create(&store, transform).await;

    let result = reconciler(&store).reconcile(&key).await.unwrap();
    assert_eq!(result.outputs[0].result, OperationResult::Created);

    let output = Secret::try_from(
        store
            .get(&ObjectKey::new(Kind::Secret, "ns", "makisu-conf"))
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(output.secret_type, "Opaque");
    let conf: Value = serde_json::from_slice(&output.data["makisu.conf"]).unwrap();
    assert_eq!(
        conf,
        json!({
            "registry0.example.org": {".*": {"security": {"basic": {"username": "user0", "password": "pass0"}}}},
            "registry1.example.org": {".*": {"security": {"basic": {"username": "user1", "password": "pass1"}}}},
        })
    );
}

#[tokio::test]
async fn test_annotation_strategy_links_without_owner_references() {
    let store = InMemoryStore::new_arc();
    seed_inputs(&store).await;
    let key = create(&store, two_input_transform()).await;
    let config = ReconcilerConfig {
        reference_strategy: ReferenceStrategyKind::Annotation,
        ..ReconcilerConfig::default()
    };
    let reconciler = Reconciler::new(Arc::clone(&store), config);
    reconciler.reconcile(&key).await.unwrap();

    let cfg = store.get(&cfg_key()).await.unwrap();
    assert!(cfg.meta().owner_references.is_empty());
    assert_eq!(
        cfg.meta()
            .annotations
            .get("secrettransform.refract.dev/ns/t")
            .map(String::as_str),
        Some("true")
    );

    // Deleting the transform removes the annotation but never the input.
    store.delete(&key).await.unwrap();
    reconciler.reconcile(&key).await.unwrap();
    let cfg = store.get(&cfg_key()).await.unwrap();
    assert!(cfg.meta().annotations.is_empty());
}

#[tokio::test]
async fn test_query_timeout_is_an_invalid_spec() {
    let store = InMemoryStore::new_arc();
    seed_inputs(&store).await;
    let mut transform = two_input_transform();
    transform.spec.output[0]
        .transformation
        .insert("count".into(), "reduce range(100000000) as $i (0; . + 1)".into());
    let key = create(&store, transform).await;
    let config = ReconcilerConfig {
        query_timeout_ms: 20,
        ..ReconcilerConfig::default()
    };
    let reconciler = Reconciler::new(Arc::clone(&store), config);

    let err = reconciler.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidOutputs { .. }));
    assert_eq!(err.reason(), SyncReason::InvalidSpec);
    assert_eq!(err.retry(Duration::from_secs(30)), RetryPolicy::Never);
    let message = err.to_string();
    assert!(message.starts_with("output 0: count: "), "{message}");
    assert!(message.contains("timed out after 20ms"), "{message}");

    let transform = load(&store, &key).await;
    let synced = transform.status.condition(CONDITION_SYNCED).unwrap();
    assert_eq!(synced.status, ConditionStatus::False);
    assert_eq!(synced.reason, "InvalidSpec");
    assert_eq!(synced.message, message);
    assert!(store.get(&out_key()).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_combined_strategy_links_by_namespace() {
    let store = InMemoryStore::new_arc();
    seed_inputs(&store).await;
    let key = create(&store, two_input_transform()).await;

    // A reference recorded by an earlier pass to an object in another namespace.
    let shared_key = ObjectKey::new(Kind::ConfigMap, "shared", "legacy");
    let annotation = "secrettransform.refract.dev/ns/t";
    let mut shared = ConfigMap::new("shared", "legacy");
    shared
        .metadata
        .annotations
        .insert(annotation.into(), "true".into());
    store.create(shared.into()).await.unwrap();
    let mut recorded = load(&store, &key).await;
    recorded.status.managed_references = vec![ManagedReference::for_target(&shared_key, "ns")];
    store.update_status(recorded.into()).await.unwrap();

    let config = ReconcilerConfig {
        reference_strategy: ReferenceStrategyKind::Combined,
        ..ReconcilerConfig::default()
    };
    let reconciler = Reconciler::new(Arc::clone(&store), config);
    reconciler.reconcile(&key).await.unwrap();

    // Same-namespace inputs get owner references and no annotation.
    let transform = load(&store, &key).await;
    for input in [cfg_key(), secret_key()] {
        let resource = store.get(&input).await.unwrap();
        assert!(linked(&resource, &transform), "{input} is not owned");
        assert!(resource.meta().annotations.is_empty());
    }
    // The cross-namespace reference was annotation-based and is released the same way.
    let shared = store.get(&shared_key).await.unwrap();
    assert!(shared.meta().annotations.get(annotation).is_none());
    assert!(shared.meta().owner_references.is_empty());
    let recorded: BTreeSet<_> = transform.status.managed_references.iter().cloned().collect();
    let expected: BTreeSet<_> = [
        ManagedReference::local(Kind::ConfigMap, "cfg"),
        ManagedReference::local(Kind::Secret, "creds"),
    ]
    .into_iter()
    .collect();
    assert_eq!(recorded, expected);

    // Deleting the transform drops the owner references and keeps the inputs.
    store.delete(&key).await.unwrap();
    let result = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(result.outcome, Outcome::Finalized);
    let cfg = config_map(&store, &cfg_key()).await;
    assert!(cfg.metadata.owner_references.is_empty());
    assert_eq!(cfg.data.get("x").map(String::as_str), Some("v1"));
}

#[tokio::test]
async fn test_output_controlled_by_another_transform_fails_write() {
    let store = InMemoryStore::new_arc();
    seed_inputs(&store).await;
    let first = create(&store, two_input_transform()).await;
    let mut rival = two_input_transform();
    rival.metadata.name = "rival".into();
    let second = create(&store, rival).await;
    let reconciler = reconciler(&store);

    reconciler.reconcile(&first).await.unwrap();
    let err = reconciler.reconcile(&second).await.unwrap_err();
    assert_eq!(err.reason(), SyncReason::FailedWrite);
    assert_eq!(err.retry(Duration::from_secs(30)), RetryPolicy::Backoff);

    let rival = load(&store, &second).await;
    assert_eq!(
        rival.status.condition(CONDITION_SYNCED).map(|c| c.reason.as_str()),
        Some("FailedWrite")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_controller_loop_follows_input_changes() {
    let store = InMemoryStore::new_arc();
    seed_inputs(&store).await;
    let key = create(&store, two_input_transform()).await;

    let reconciler = Arc::new(reconciler(&store));
    let controller = Arc::new(ControllerLoop::new(reconciler, LoopConfig::default()));
    let stopper = controller.stopper();
    let running = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.run().await })
    };

    assert!(controller.wait_idle(Duration::from_secs(5)).await);
    let out = config_map(&store, &out_key()).await;
    assert_eq!(out.data.get("both").map(String::as_str), Some("v1/hunter2"));

    // Editing an input re-triggers the transform through its back-reference.
    let mut cfg = config_map(&store, &cfg_key()).await;
    cfg.data.insert("x".into(), "v2".into());
    store.update(cfg.into()).await.unwrap();

    assert!(controller.wait_idle(Duration::from_secs(5)).await);
    let out = config_map(&store, &out_key()).await;
    assert_eq!(out.data.get("y").map(String::as_str), Some("v2"));
    assert_eq!(out.data.get("both").map(String::as_str), Some("v2/hunter2"));

    let transform = load(&store, &key).await;
    assert!(transform.status.condition(CONDITION_SYNCED).unwrap().is_true());

    stopper.stop();
    running.await.unwrap().unwrap();
}
