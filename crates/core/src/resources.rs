//! Text and binary bundles, and the tagged union over every stored kind.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::object::{Kind, ObjectIdentity, ObjectKey, ObjectMeta};
use crate::secret_transform::SecretTransform;

/// Default type of a Secret.
pub const SECRET_TYPE_OPAQUE: &str = "Opaque";

/// Text bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMap {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl ConfigMap {
    /// Create an empty ConfigMap.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            data: BTreeMap::new(),
        }
    }

    /// Set a data entry, builder style.
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Binary bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(rename = "type", default = "default_secret_type")]
    pub secret_type: String,
    #[serde(default, with = "base64_map")]
    pub data: BTreeMap<String, Vec<u8>>,
}

fn default_secret_type() -> String {
    SECRET_TYPE_OPAQUE.to_string()
}

impl Secret {
    /// Create an empty opaque Secret.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            secret_type: default_secret_type(),
            data: BTreeMap::new(),
        }
    }

    /// Set a data entry, builder style.
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Serde helper module for base64 encoding of binary map values.
mod base64_map {
    use std::collections::BTreeMap;

    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    const ENGINE: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

    pub fn serialize<S>(data: &BTreeMap<String, Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        data.iter()
            .map(|(k, v)| (k, ENGINE.encode(v)))
            .collect::<BTreeMap<_, _>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Option::<BTreeMap<String, String>>::deserialize(deserializer)?;
        encoded
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| {
                ENGINE
                    .decode(v.as_bytes())
                    .map(|bytes| (k.clone(), bytes))
                    .map_err(|e| serde::de::Error::custom(format!("data.{k}: {e}")))
            })
            .collect()
    }
}

/// Any object the store holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Resource {
    ConfigMap(ConfigMap),
    Secret(Secret),
    SecretTransform(SecretTransform),
}

impl Resource {
    /// Kind of the wrapped object.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        match self {
            Self::ConfigMap(_) => Kind::ConfigMap,
            Self::Secret(_) => Kind::Secret,
            Self::SecretTransform(_) => Kind::SecretTransform,
        }
    }

    /// Metadata of the wrapped object.
    #[must_use]
    pub const fn meta(&self) -> &ObjectMeta {
        match self {
            Self::ConfigMap(o) => &o.metadata,
            Self::Secret(o) => &o.metadata,
            Self::SecretTransform(o) => &o.metadata,
        }
    }

    /// Mutable metadata of the wrapped object.
    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::ConfigMap(o) => &mut o.metadata,
            Self::Secret(o) => &mut o.metadata,
            Self::SecretTransform(o) => &mut o.metadata,
        }
    }

    /// Store key of the wrapped object.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        let meta = self.meta();
        ObjectKey::new(self.kind(), meta.namespace.clone(), meta.name.clone())
    }

    /// Identity (key plus uid) of the wrapped object.
    #[must_use]
    pub fn identity(&self) -> ObjectIdentity {
        ObjectIdentity::from_meta(self.kind(), self.meta())
    }

    /// An empty object of the given key.
    #[must_use]
    pub fn empty(key: &ObjectKey) -> Self {
        match key.kind {
            Kind::ConfigMap => Self::ConfigMap(ConfigMap::new(&key.namespace, &key.name)),
            Kind::Secret => Self::Secret(Secret::new(&key.namespace, &key.name)),
            Kind::SecretTransform => {
                Self::SecretTransform(SecretTransform::new(&key.namespace, &key.name))
            }
        }
    }

    /// Whether both objects carry the same payload (data or spec), ignoring metadata and status.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::ConfigMap(a), Self::ConfigMap(b)) => a.data == b.data,
            (Self::Secret(a), Self::Secret(b)) => {
                a.data == b.data && a.secret_type == b.secret_type
            }
            (Self::SecretTransform(a), Self::SecretTransform(b)) => a.spec == b.spec,
            _ => false,
        }
    }

    /// Check the object can be stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidObject`] when the name is empty.
    pub fn validate(&self) -> Result<()> {
        if self.meta().name.is_empty() {
            return Err(Error::invalid_object(format!(
                "{} without metadata.name",
                self.kind()
            )));
        }
        Ok(())
    }
}

macro_rules! impl_resource_conversions {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Resource {
                fn from(value: $variant) -> Self {
                    Self::$variant(value)
                }
            }

            impl TryFrom<Resource> for $variant {
                type Error = Error;

                fn try_from(value: Resource) -> Result<Self> {
                    match value {
                        Resource::$variant(inner) => Ok(inner),
                        other => Err(Error::kind_mismatch(Kind::$variant, other.kind())),
                    }
                }
            }
        )*
    };
}

impl_resource_conversions!(ConfigMap, Secret, SecretTransform);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_data_serializes_as_base64() {
        let secret = Secret::new("ns", "s").with_entry("k", b"hello".to_vec());
        let json = serde_json::to_value(&secret).unwrap();
        assert_eq!(json["data"]["k"], "aGVsbG8=");
        assert_eq!(json["type"], "Opaque");

        let back: Secret = serde_json::from_value(json).unwrap();
        assert_eq!(back, secret);
    }

    #[test]
    fn test_secret_rejects_invalid_base64() {
        let json = serde_json::json!({"metadata": {"name": "s"}, "data": {"k": "!!"}});
        let err = serde_json::from_value::<Secret>(json).unwrap_err();
        assert!(err.to_string().contains("data.k"));
    }

    #[test]
    fn test_try_from_reports_kind_mismatch() {
        let resource = Resource::from(ConfigMap::new("ns", "c"));
        let err = Secret::try_from(resource).unwrap_err();
        assert_eq!(err, Error::kind_mismatch(Kind::Secret, Kind::ConfigMap));
    }

    #[test]
    fn test_same_content_ignores_metadata() {
        let a = Resource::from(ConfigMap::new("ns", "c").with_entry("k", "v"));
        let mut b = a.clone();
        b.meta_mut().annotations.insert("x".into(), "true".into());
        assert!(a.same_content(&b));

        let c = Resource::from(ConfigMap::new("ns", "c").with_entry("k", "w"));
        assert!(!a.same_content(&c));
    }

    #[test]
    fn test_empty_resource_matches_key() {
        let key = ObjectKey::new(Kind::Secret, "ns", "out");
        let resource = Resource::empty(&key);
        assert_eq!(resource.key(), key);
    }

    #[test]
    fn test_validate_requires_name() {
        let resource = Resource::from(ConfigMap::new("ns", ""));
        assert!(matches!(
            resource.validate(),
            Err(Error::InvalidObject { .. })
        ));
    }
}
