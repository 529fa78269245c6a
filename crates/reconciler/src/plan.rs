//! Planning outputs: evaluate every rule before anything is written.

use std::collections::BTreeMap;

use refract_core::{
    Kind, ObjectIdentity, ObjectKey, Output, Resource, SECRET_TYPE_OPAQUE,
};
use refract_store::StoreError;
use refract_transform::{
    InputScope, TransformEngine, bytes_map_from_output, text_map_from_output,
};
use serde_json::Value;

use crate::error::{OutputCause, OutputFailure, ReconcileError, Result, SpecError};
use crate::inputs::select_target;

/// Rendered payload of one output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// ConfigMap data.
    Text(BTreeMap<String, String>),
    /// Secret type and data.
    Binary {
        secret_type: String,
        data: BTreeMap<String, Vec<u8>>,
    },
}

/// An output ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    pub key: ObjectKey,
    pub payload: Payload,
}

impl PlannedOutput {
    /// Replace the payload of `resource` and make `owner` its controller.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when the resource has the wrong kind
    /// or is already controlled by another owner.
    pub fn apply(&self, resource: &mut Resource, owner: &ObjectIdentity) -> refract_store::Result<()> {
        match (&self.payload, &mut *resource) {
            (Payload::Text(data), Resource::ConfigMap(config_map)) => {
                config_map.data.clone_from(data);
            }
            (Payload::Binary { secret_type, data }, Resource::Secret(secret)) => {
                secret.secret_type.clone_from(secret_type);
                secret.data.clone_from(data);
            }
            (_, other) => {
                return Err(StoreError::invalid(format!(
                    "{} cannot hold the output for {}",
                    other.key(),
                    self.key
                )));
            }
        }
        set_controller_reference(resource, owner)
    }
}

fn set_controller_reference(resource: &mut Resource, owner: &ObjectIdentity) -> refract_store::Result<()> {
    let key = resource.key();
    let meta = resource.meta_mut();
    if let Some(controller) = meta.controller_reference() {
        if controller.refers_to(owner) {
            return Ok(());
        }
        return Err(StoreError::invalid(format!(
            "{key} is already controlled by {} {}",
            controller.kind, controller.name
        )));
    }
    match meta.owner_references.iter_mut().find(|r| r.refers_to(owner)) {
        Some(existing) => {
            existing.controller = true;
            existing.block_owner_deletion = true;
        }
        None => meta.owner_references.push(owner.owner_reference(true)),
    }
    Ok(())
}

/// Check that a rule names exactly one target and has a transformation.
fn rule_target(rule: &Output) -> std::result::Result<(Kind, &str), SpecError> {
    if rule.transformation.is_empty() {
        return Err(SpecError::MissingTransformation);
    }
    select_target(
        rule.secret.as_ref().map(|s| s.name.as_str()),
        rule.config_map.as_ref().map(|c| c.name.as_str()),
    )
}

/// Validate the shape of every output rule without evaluating anything.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidOutputs`] listing every malformed rule.
pub fn validate_outputs(rules: &[Output]) -> Result<()> {
    let failures: Vec<OutputFailure> = rules
        .iter()
        .enumerate()
        .filter_map(|(index, rule)| {
            rule_target(rule).err().map(|cause| OutputFailure {
                index,
                field: None,
                cause: cause.into(),
            })
        })
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::InvalidOutputs { failures })
    }
}

/// Evaluate every rule against `scope`.
///
/// All rules are planned; if any failed, nothing is returned.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidOutputs`] carrying one failure per
/// failed rule, in declaration order.
pub fn plan_outputs(
    engine: &TransformEngine,
    scope: &InputScope,
    namespace: &str,
    rules: &[Output],
) -> Result<Vec<PlannedOutput>> {
    let input = scope.to_value();
    let mut planned = Vec::with_capacity(rules.len());
    let mut failures = Vec::new();

    for (index, rule) in rules.iter().enumerate() {
        match plan_rule(engine, &input, namespace, rule) {
            Ok(output) => planned.push(output),
            Err((field, cause)) => failures.push(OutputFailure { index, field, cause }),
        }
    }

    if failures.is_empty() {
        Ok(planned)
    } else {
        Err(ReconcileError::InvalidOutputs { failures })
    }
}

fn plan_rule(
    engine: &TransformEngine,
    input: &Value,
    namespace: &str,
    rule: &Output,
) -> std::result::Result<PlannedOutput, (Option<String>, OutputCause)> {
    let (kind, name) = rule_target(rule).map_err(|e| (None, OutputCause::from(e)))?;

    let mut fields = BTreeMap::new();
    for (field, query) in &rule.transformation {
        let value = engine
            .evaluate_value(input, query)
            .map_err(|e| (Some(field.clone()), OutputCause::from(e)))?;
        fields.insert(field.clone(), value);
    }

    let payload = match kind {
        Kind::Secret => Payload::Binary {
            secret_type: rule
                .secret
                .as_ref()
                .and_then(|s| s.secret_type.clone())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| SECRET_TYPE_OPAQUE.to_string()),
            data: bytes_map_from_output(&fields).map_err(|e| (None, OutputCause::from(e)))?,
        },
        _ => Payload::Text(text_map_from_output(&fields).map_err(|e| (None, OutputCause::from(e)))?),
    };

    Ok(PlannedOutput {
        key: ObjectKey::new(kind, namespace, name),
        payload,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use refract_core::{ConfigMap, Secret, SecretOutput};

    fn scope() -> InputScope {
        let mut scope = InputScope::new();
        scope.insert_text_bundle(
            "cfg",
            &BTreeMap::from([
                ("x".to_string(), "v1".to_string()),
                ("doc".to_string(), "{\"a\": [1, 2]}".to_string()),
            ]),
        );
        scope
    }

    fn owner(uid: &str) -> ObjectIdentity {
        ObjectIdentity {
            kind: Kind::SecretTransform,
            namespace: "ns".into(),
            name: "t".into(),
            uid: uid.into(),
        }
    }

    #[test]
    fn test_plan_config_map_and_secret() {
        let rules = vec![
            Output::config_map("out").with_field("y", ".cfg.x.string"),
            Output::secret("sec")
                .with_field("list", ".cfg.doc.object.a")
                .with_field("missing", ".cfg.nope"),
        ];
        let planned = plan_outputs(&TransformEngine::default(), &scope(), "ns", &rules).unwrap();
        assert_eq!(planned.len(), 2);
        assert_eq!(planned[0].key, ObjectKey::new(Kind::ConfigMap, "ns", "out"));
        assert_eq!(
            planned[0].payload,
            Payload::Text(BTreeMap::from([("y".to_string(), "v1".to_string())]))
        );
        assert_eq!(
            planned[1].payload,
            Payload::Binary {
                secret_type: "Opaque".into(),
                data: BTreeMap::from([
                    ("list".to_string(), b"[1,2]".to_vec()),
                    ("missing".to_string(), Vec::new()),
                ]),
            }
        );
    }

    #[test]
    fn test_declared_secret_type_is_kept() {
        let rules = vec![Output {
            secret: Some(SecretOutput {
                name: "reg".into(),
                secret_type: Some("kubernetes.io/dockerconfigjson".into()),
            }),
            config_map: None,
            transformation: BTreeMap::from([("k".to_string(), "\"v\"".to_string())]),
        }];
        let planned = plan_outputs(&TransformEngine::default(), &scope(), "ns", &rules).unwrap();
        assert!(matches!(
            &planned[0].payload,
            Payload::Binary { secret_type, .. } if secret_type == "kubernetes.io/dockerconfigjson"
        ));
    }

    #[test]
    fn test_every_rule_is_planned_before_failing() {
        let rules = vec![
            Output::config_map("a"),
            Output::config_map("b").with_field("y", ".cfg.x.string"),
            Output::config_map("c").with_field("bad", ".cfg.x.string | tonumber"),
            Output {
                secret: Some(SecretOutput {
                    name: "d".into(),
                    secret_type: None,
                }),
                config_map: Some(refract_core::ConfigMapOutput { name: "d".into() }),
                transformation: BTreeMap::from([("k".to_string(), ".".to_string())]),
            },
        ];
        let err = plan_outputs(&TransformEngine::default(), &scope(), "ns", &rules).unwrap_err();
        let failures = match err {
            ReconcileError::InvalidOutputs { failures } => failures,
            _ => Vec::new(),
        };
        let summary: Vec<(usize, Option<&str>)> = failures
            .iter()
            .map(|f| (f.index, f.field.as_deref()))
            .collect();
        assert_eq!(summary, vec![(0, None), (2, Some("bad")), (3, None)]);
        assert_eq!(failures[0].cause, OutputCause::Spec(SpecError::MissingTransformation));
        assert_eq!(failures[2].cause, OutputCause::Spec(SpecError::AmbiguousResource));
    }

    #[test]
    fn test_validate_outputs() {
        assert!(validate_outputs(&[Output::secret("s").with_field("k", ".")]).is_ok());
        let unspecified = Output {
            transformation: BTreeMap::from([("k".to_string(), ".".to_string())]),
            ..Output::default()
        };
        let err = validate_outputs(&[unspecified]).unwrap_err();
        assert_eq!(err.to_string(), "output 0: neither configMap or secret specified");
    }

    #[test]
    fn test_apply_sets_payload_and_controller() {
        let planned = PlannedOutput {
            key: ObjectKey::new(Kind::Secret, "ns", "out"),
            payload: Payload::Binary {
                secret_type: "Opaque".into(),
                data: BTreeMap::from([("k".to_string(), b"v".to_vec())]),
            },
        };
        let mut resource: Resource = Secret::new("ns", "out").with_entry("stale", b"x".to_vec()).into();
        planned.apply(&mut resource, &owner("u1")).unwrap();
        let secret = Secret::try_from(resource.clone()).unwrap();
        assert_eq!(secret.data, BTreeMap::from([("k".to_string(), b"v".to_vec())]));
        let controller = secret.metadata.controller_reference().unwrap();
        assert_eq!(controller.name, "t");

        // Applying twice does not add another reference.
        planned.apply(&mut resource, &owner("u1")).unwrap();
        assert_eq!(resource.meta().owner_references.len(), 1);
    }

    #[test]
    fn test_apply_upgrades_back_reference() {
        let planned = PlannedOutput {
            key: ObjectKey::new(Kind::ConfigMap, "ns", "out"),
            payload: Payload::Text(BTreeMap::new()),
        };
        let mut resource: Resource = ConfigMap::new("ns", "out").into();
        resource.meta_mut().owner_references.push(owner("u1").owner_reference(false));
        planned.apply(&mut resource, &owner("u1")).unwrap();
        assert_eq!(resource.meta().owner_references.len(), 1);
        assert!(resource.meta().owner_references[0].controller);
    }

    #[test]
    fn test_apply_refuses_foreign_controller() {
        let planned = PlannedOutput {
            key: ObjectKey::new(Kind::ConfigMap, "ns", "out"),
            payload: Payload::Text(BTreeMap::new()),
        };
        let mut resource: Resource = ConfigMap::new("ns", "out").into();
        let other = ObjectIdentity {
            name: "other".into(),
            ..owner("u2")
        };
        resource.meta_mut().owner_references.push(other.owner_reference(true));
        let err = planned.apply(&mut resource, &owner("u1")).unwrap_err();
        assert!(err.to_string().contains("already controlled by SecretTransform other"));
    }

    #[test]
    fn test_apply_rejects_kind_mismatch() {
        let planned = PlannedOutput {
            key: ObjectKey::new(Kind::Secret, "ns", "out"),
            payload: Payload::Text(BTreeMap::new()),
        };
        let mut resource: Resource = Secret::new("ns", "out").into();
        assert!(planned.apply(&mut resource, &owner("u1")).is_err());
    }
}
