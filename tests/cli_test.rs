//! End-to-end tests for the `refract` command handlers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use refract::cli::{Overrides, StrategyArg};
use refract::commands::{EvalFormat, cmd_apply, cmd_eval, load_manifests, with_overrides};
use refract::refract_core::{CONDITION_SYNCED, ConfigMap, Kind, Resource, SecretTransform, parse_manifests};
use refract::refract_reconciler::ReferenceStrategyKind;
use refract::refract_store::{InMemoryStore, ResourceStore};
use refract::refract_transform::TransformEngine;
use refract::{ConfigError, RefractConfig};
use tempfile::NamedTempFile;

const MANIFESTS: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: myconfig
  namespace: default
data:
  someprop: cmvalue
---
apiVersion: refract.dev/v1alpha1
kind: SecretTransform
metadata:
  name: mytransform
  namespace: default
spec:
  input:
    config:
      configMap: myconfig
  output:
    - configMap:
        name: out
      transformation:
        myconf: '{confKey: .config.someprop.string}'
"#;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn find(objects: &[Resource], kind: Kind, name: &str) -> Resource {
    objects
        .iter()
        .find(|r| r.kind() == kind && r.meta().name == name)
        .cloned()
        .expect("object not rendered")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_apply_renders_derived_objects() {
    let manifest = write_temp(MANIFESTS);
    let rendered = cmd_apply(
        &[manifest.path().to_path_buf()],
        RefractConfig::default(),
        Duration::from_secs(10),
    )
    .await
    .unwrap();

    let objects = parse_manifests(&rendered).unwrap();
    let out = ConfigMap::try_from(find(&objects, Kind::ConfigMap, "out")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&out.data["myconf"]).unwrap();
    assert_eq!(value, serde_json::json!({"confKey": "cmvalue"}));
    assert_eq!(out.metadata.owner_references.len(), 1);
    assert_eq!(out.metadata.owner_references[0].name, "mytransform");

    let transform =
        SecretTransform::try_from(find(&objects, Kind::SecretTransform, "mytransform")).unwrap();
    assert!(
        transform
            .status
            .condition(CONDITION_SYNCED)
            .is_some_and(|c| c.is_true())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_apply_reports_unreadable_manifest() {
    let missing = PathBuf::from("/nonexistent/refract/manifest.yaml");
    let err = cmd_apply(&[missing], RefractConfig::default(), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Failed to read"));
}

#[tokio::test]
async fn test_load_manifests_rejects_duplicates() {
    let store = InMemoryStore::new();
    let manifest = write_temp(MANIFESTS);
    let paths = vec![manifest.path().to_path_buf()];

    assert_eq!(load_manifests(&store, &paths).await.unwrap(), 2);
    assert!(load_manifests(&store, &paths).await.is_err());
    assert_eq!(store.list(Kind::ConfigMap, Some("default")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_eval_formats() {
    let input = write_temp("cfg:\n  x: v1\n  doc: '{\"a\": 1}'\n");
    let engine = TransformEngine::default();

    let json = cmd_eval(&engine, ".cfg.doc.object", Some(input.path()), EvalFormat::Json)
        .await
        .unwrap();
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&json).unwrap(),
        serde_json::json!({"a": 1})
    );

    let text = cmd_eval(&engine, ".cfg.x.string", Some(input.path()), EvalFormat::Text)
        .await
        .unwrap();
    assert_eq!(text, "v1");

    let binary = cmd_eval(&engine, ".cfg.x.string", Some(input.path()), EvalFormat::Binary)
        .await
        .unwrap();
    assert_eq!(binary, "djE=");
}

#[tokio::test]
async fn test_eval_without_input_sees_empty_scope() {
    let engine = TransformEngine::default();
    let json = cmd_eval(&engine, ".", None, EvalFormat::Json).await.unwrap();
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&json).unwrap(),
        serde_json::json!({})
    );
}

#[test]
fn test_overrides_replace_file_settings() {
    let overrides = Overrides {
        strategy: Some(StrategyArg::Annotation),
        workers: Some(8),
    };
    let config = with_overrides(RefractConfig::default(), &overrides).unwrap();
    assert_eq!(config.reconciler.reference_strategy, ReferenceStrategyKind::Annotation);
    assert_eq!(config.controller.workers, 8);

    let zero = Overrides {
        strategy: None,
        workers: Some(0),
    };
    assert!(with_overrides(RefractConfig::default(), &zero).is_err());
}

#[test]
fn test_load_config_file() {
    let file = write_temp("[reconciler]\nquery_timeout_ms = 250\n");
    let config = RefractConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.reconciler.query_timeout(), Duration::from_millis(250));

    let err = RefractConfig::load(Some(std::path::Path::new("/nonexistent/refract.toml")))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}
