//! Resolving declared inputs into the query scope.

use std::collections::BTreeMap;

use refract_core::{InputRef, Kind, ObjectKey, Resource};
use refract_store::ResourceStore;
use refract_transform::InputScope;

use crate::error::{ReconcileError, Result, SpecError};

/// Pick the single bundle kind a reference names. Empty names count as unset.
pub(crate) fn select_target<'a>(
    secret: Option<&'a str>,
    config_map: Option<&'a str>,
) -> std::result::Result<(Kind, &'a str), SpecError> {
    let secret = secret.filter(|name| !name.is_empty());
    let config_map = config_map.filter(|name| !name.is_empty());
    match (secret, config_map) {
        (Some(_), Some(_)) => Err(SpecError::AmbiguousResource),
        (Some(name), None) => Ok((Kind::Secret, name)),
        (None, Some(name)) => Ok((Kind::ConfigMap, name)),
        (None, None) => Err(SpecError::UnspecifiedResource),
    }
}

/// Validate every input reference, returning logical names with their keys.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidInput`] for the first reference naming
/// both or neither bundle kind.
pub fn validate_inputs(
    namespace: &str,
    inputs: &BTreeMap<String, InputRef>,
) -> Result<Vec<(String, ObjectKey)>> {
    inputs
        .iter()
        .map(|(name, reference)| {
            select_target(reference.secret.as_deref(), reference.config_map.as_deref())
                .map(|(kind, target)| (name.clone(), ObjectKey::new(kind, namespace, target)))
                .map_err(|source| ReconcileError::InvalidInput {
                    input: name.clone(),
                    source,
                })
        })
        .collect()
}

/// Fetch every input and build the scope queries run against.
///
/// # Errors
///
/// Returns [`ReconcileError::MissingInput`] when an input does not exist and
/// [`ReconcileError::ReadInput`] for any other store failure.
pub async fn resolve_inputs<S>(store: &S, inputs: &[(String, ObjectKey)]) -> Result<InputScope>
where
    S: ResourceStore + ?Sized,
{
    let mut scope = InputScope::new();
    for (name, key) in inputs {
        let resource = store.get(key).await.map_err(|source| {
            if source.is_not_found() {
                ReconcileError::MissingInput {
                    input: name.clone(),
                    source,
                }
            } else {
                ReconcileError::ReadInput {
                    input: name.clone(),
                    source,
                }
            }
        })?;
        match resource {
            Resource::Secret(secret) => scope.insert_binary_bundle(name.clone(), &secret.data),
            Resource::ConfigMap(config_map) => {
                scope.insert_text_bundle(name.clone(), &config_map.data);
            }
            Resource::SecretTransform(_) => {}
        }
    }
    Ok(scope)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use refract_core::{ConfigMap, Secret};
    use refract_store::InMemoryStore;
    use serde_json::json;

    #[test]
    fn test_select_target() {
        assert_eq!(select_target(Some("a"), None), Ok((Kind::Secret, "a")));
        assert_eq!(select_target(None, Some("b")), Ok((Kind::ConfigMap, "b")));
        assert_eq!(select_target(Some("a"), Some("b")), Err(SpecError::AmbiguousResource));
        assert_eq!(select_target(None, None), Err(SpecError::UnspecifiedResource));
        assert_eq!(select_target(Some(""), Some("b")), Ok((Kind::ConfigMap, "b")));
        assert_eq!(select_target(Some(""), None), Err(SpecError::UnspecifiedResource));
    }

    #[test]
    fn test_validate_inputs_names_the_bad_input() {
        let inputs = BTreeMap::from([
            ("good".to_string(), InputRef::secret("s")),
            (
                "bad".to_string(),
                InputRef {
                    secret: Some("s".into()),
                    config_map: Some("c".into()),
                },
            ),
        ]);
        let err = validate_inputs("ns", &inputs).unwrap_err();
        assert_eq!(
            err.to_string(),
            "input bad: configMap or secret required but both specified"
        );
    }

    #[tokio::test]
    async fn test_resolve_inputs() {
        let store = InMemoryStore::new();
        store
            .create(ConfigMap::new("ns", "cfg").with_entry("x", "v1").into())
            .await
            .unwrap();
        store
            .create(Secret::new("ns", "sec").with_entry("doc", b"{\"a\":1}".to_vec()).into())
            .await
            .unwrap();

        let inputs = BTreeMap::from([
            ("c".to_string(), InputRef::config_map("cfg")),
            ("s".to_string(), InputRef::secret("sec")),
        ]);
        let keys = validate_inputs("ns", &inputs).unwrap();
        let scope = resolve_inputs(&store, &keys).await.unwrap();
        assert_eq!(
            scope.to_value(),
            json!({
                "c": {"x": {"string": "v1", "object": null}},
                "s": {"doc": {"string": "{\"a\":1}", "object": {"a": 1}}},
            })
        );
    }

    #[tokio::test]
    async fn test_missing_input_is_classified() {
        let store = InMemoryStore::new();
        let keys = vec![("a".to_string(), ObjectKey::new(Kind::Secret, "ns", "absent"))];
        let err = resolve_inputs(&store, &keys).await.unwrap_err();
        assert!(matches!(err, ReconcileError::MissingInput { ref input, .. } if input == "a"));
    }
}
