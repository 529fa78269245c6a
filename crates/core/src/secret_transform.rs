//! The `SecretTransform` resource: named inputs, output rules and observed status.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::object::{Kind, ObjectKey, ObjectMeta};

/// Condition type summarising the outcome of the last pass.
pub const CONDITION_SYNCED: &str = "Synced";

/// Transform resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretTransform {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: SecretTransformSpec,
    #[serde(default)]
    pub status: SecretTransformStatus,
}

impl SecretTransform {
    /// Create an empty transform.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            ..Self::default()
        }
    }

    /// Store key of this transform.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(
            Kind::SecretTransform,
            self.metadata.namespace.clone(),
            self.metadata.name.clone(),
        )
    }
}

/// Desired state of a transform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretTransformSpec {
    /// Logical input name to referenced bundle.
    #[serde(default)]
    pub input: BTreeMap<String, InputRef>,
    /// Output rules in declaration order.
    #[serde(default)]
    pub output: Vec<Output>,
}

/// Reference to exactly one input bundle in the transform's namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRef {
    #[serde(default, alias = "secretRef", skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, alias = "configMapRef", skip_serializing_if = "Option::is_none")]
    pub config_map: Option<String>,
}

impl InputRef {
    /// Reference a Secret.
    pub fn secret(name: impl Into<String>) -> Self {
        Self {
            secret: Some(name.into()),
            config_map: None,
        }
    }

    /// Reference a ConfigMap.
    pub fn config_map(name: impl Into<String>) -> Self {
        Self {
            secret: None,
            config_map: Some(name.into()),
        }
    }
}

/// One output target plus its field to query mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    #[serde(default, alias = "secretOutput", skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretOutput>,
    #[serde(default, alias = "configMapOutput", skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapOutput>,
    #[serde(default)]
    pub transformation: BTreeMap<String, String>,
}

impl Output {
    /// Output rule writing a Secret.
    pub fn secret(name: impl Into<String>) -> Self {
        Self {
            secret: Some(SecretOutput {
                name: name.into(),
                secret_type: None,
            }),
            ..Self::default()
        }
    }

    /// Output rule writing a ConfigMap.
    pub fn config_map(name: impl Into<String>) -> Self {
        Self {
            config_map: Some(ConfigMapOutput { name: name.into() }),
            ..Self::default()
        }
    }

    /// Add a field query, builder style.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, query: impl Into<String>) -> Self {
        self.transformation.insert(field.into(), query.into());
        self
    }
}

/// Secret output target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretOutput {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub secret_type: Option<String>,
}

/// ConfigMap output target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMapOutput {
    pub name: String,
}

/// Observed state of a transform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretTransformStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_references: Vec<ManagedReference>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_hash: String,
}

impl SecretTransformStatus {
    /// Look up a condition by type.
    #[must_use]
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Set a condition, returning whether anything observable changed.
    ///
    /// The transition time only moves when the status flips.
    pub fn set_condition(&mut self, mut condition: Condition) -> bool {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            None => {
                self.conditions.push(condition);
                true
            }
            Some(existing) => {
                if existing.status == condition.status
                    && existing.reason == condition.reason
                    && existing.message == condition.message
                {
                    return false;
                }
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
                true
            }
        }
    }
}

/// Input object currently linked to a transform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManagedReference {
    pub kind: Kind,
    pub name: String,
    /// Namespace of the target when it differs from the transform's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ManagedReference {
    /// Reference to a target in the transform's own namespace.
    pub fn local(kind: Kind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: None,
        }
    }

    /// Record `target` relative to an owner living in `owner_namespace`.
    #[must_use]
    pub fn for_target(target: &ObjectKey, owner_namespace: &str) -> Self {
        Self {
            kind: target.kind,
            name: target.name.clone(),
            namespace: (target.namespace != owner_namespace).then(|| target.namespace.clone()),
        }
    }

    /// Store key of the target, given the owner's namespace.
    #[must_use]
    pub fn key(&self, owner_namespace: &str) -> ObjectKey {
        let namespace = self.namespace.as_deref().unwrap_or(owner_namespace);
        ObjectKey::new(self.kind, namespace, self.name.clone())
    }
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Status condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// A condition stamped with the current time.
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Some(Utc::now()),
        }
    }

    /// Whether the condition is `True`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}
