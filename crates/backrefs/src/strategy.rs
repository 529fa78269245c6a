//! Linking strategies.
//!
//! A strategy records, on a target object, that some owner depends on it.
//! Adding an existing link or removing an absent one returns `false`.

use std::fmt;

use refract_core::{ObjectIdentity, ObjectMeta};

/// Value of an annotation back-reference.
pub const ANNOTATION_VALUE: &str = "true";

/// How a back-reference is written onto the referenced object.
pub trait BackReferenceStrategy: Send + Sync + fmt::Debug {
    /// Link `from` back to `to`. Returns `true` when `from` changed.
    fn add_reference(&self, from: &mut ObjectMeta, to: &ObjectIdentity) -> bool;

    /// Unlink `from` from `to`. Returns `true` when `from` changed.
    fn del_reference(&self, from: &mut ObjectMeta, to: &ObjectIdentity) -> bool;
}

/// Links via non-controller owner references.
///
/// The store deletes an object once all of its owners are gone, so these
/// links cascade. Owner references never cross namespaces; requests to do
/// so are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerReferences;

impl BackReferenceStrategy for OwnerReferences {
    fn add_reference(&self, from: &mut ObjectMeta, to: &ObjectIdentity) -> bool {
        if from.namespace != to.namespace
            || from.owner_references.iter().any(|r| r.refers_to(to))
        {
            return false;
        }
        from.owner_references.push(to.owner_reference(false));
        true
    }

    fn del_reference(&self, from: &mut ObjectMeta, to: &ObjectIdentity) -> bool {
        let before = from.owner_references.len();
        from.owner_references
            .retain(|r| r.controller || !r.refers_to(to));
        from.owner_references.len() != before
    }
}

/// Links via a marker annotation, which works across namespaces but does
/// not cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationReferences {
    owner_api_group: String,
}

impl AnnotationReferences {
    pub fn new(owner_api_group: impl Into<String>) -> Self {
        Self {
            owner_api_group: owner_api_group.into(),
        }
    }

    /// `<lowercase owner kind>.<group>/<owner namespace>/<owner name>`
    #[must_use]
    pub fn annotation_key(&self, to: &ObjectIdentity) -> String {
        annotation_key(&self.owner_api_group, to)
    }
}

impl BackReferenceStrategy for AnnotationReferences {
    fn add_reference(&self, from: &mut ObjectMeta, to: &ObjectIdentity) -> bool {
        let key = self.annotation_key(to);
        if from.annotations.get(&key).is_some_and(|v| v == ANNOTATION_VALUE) {
            return false;
        }
        from.annotations.insert(key, ANNOTATION_VALUE.to_string());
        true
    }

    fn del_reference(&self, from: &mut ObjectMeta, to: &ObjectIdentity) -> bool {
        let key = self.annotation_key(to);
        if from.annotations.get(&key).is_some_and(|v| v == ANNOTATION_VALUE) {
            from.annotations.remove(&key);
            return true;
        }
        false
    }
}

/// Owner references within a namespace, annotations across namespaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedReferences {
    annotations: AnnotationReferences,
}

impl CombinedReferences {
    pub fn new(owner_api_group: impl Into<String>) -> Self {
        Self {
            annotations: AnnotationReferences::new(owner_api_group),
        }
    }

    fn pick(&self, from: &ObjectMeta, to: &ObjectIdentity) -> &dyn BackReferenceStrategy {
        if from.namespace == to.namespace {
            &OwnerReferences
        } else {
            &self.annotations
        }
    }
}

impl BackReferenceStrategy for CombinedReferences {
    fn add_reference(&self, from: &mut ObjectMeta, to: &ObjectIdentity) -> bool {
        self.pick(from, to).add_reference(from, to)
    }

    fn del_reference(&self, from: &mut ObjectMeta, to: &ObjectIdentity) -> bool {
        self.pick(from, to).del_reference(from, to)
    }
}

/// Annotation key recording that `to` depends on the annotated object.
#[must_use]
pub fn annotation_key(api_group: &str, to: &ObjectIdentity) -> String {
    format!(
        "{}.{api_group}/{}/{}",
        to.kind.as_str().to_lowercase(),
        to.namespace,
        to.name
    )
}

/// Split an annotation back-reference key into the owner's namespace and name.
///
/// Returns `None` for keys of other groups or malformed keys.
#[must_use]
pub fn parse_annotation_key(key: &str, api_group: &str) -> Option<(String, String)> {
    let (prefix, rest) = key.split_once('/')?;
    let (kind, group) = prefix.split_once('.')?;
    if kind.is_empty() || group != api_group {
        return None;
    }
    let (namespace, name) = rest.split_once('/')?;
    if namespace.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((namespace.to_string(), name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use refract_core::Kind;

    fn owner(namespace: &str) -> ObjectIdentity {
        ObjectIdentity {
            kind: Kind::SecretTransform,
            namespace: namespace.into(),
            name: "t".into(),
            uid: "uid-1".into(),
        }
    }

    #[test]
    fn test_owner_references_are_idempotent() {
        let mut meta = ObjectMeta::new("ns", "input");
        assert!(OwnerReferences.add_reference(&mut meta, &owner("ns")));
        assert!(!OwnerReferences.add_reference(&mut meta, &owner("ns")));
        assert_eq!(meta.owner_references.len(), 1);
        assert!(!meta.owner_references[0].controller);
        assert!(OwnerReferences.del_reference(&mut meta, &owner("ns")));
        assert!(!OwnerReferences.del_reference(&mut meta, &owner("ns")));
        assert!(meta.owner_references.is_empty());
    }

    #[test]
    fn test_owner_references_stay_in_namespace() {
        let mut meta = ObjectMeta::new("other", "input");
        assert!(!OwnerReferences.add_reference(&mut meta, &owner("ns")));
        assert!(meta.owner_references.is_empty());
    }

    #[test]
    fn test_owner_reference_removal_keeps_controller() {
        let mut meta = ObjectMeta::new("ns", "output");
        meta.owner_references.push(owner("ns").owner_reference(true));
        assert!(!OwnerReferences.del_reference(&mut meta, &owner("ns")));
        assert_eq!(meta.owner_references.len(), 1);
    }

    #[test]
    fn test_annotation_references() {
        let strategy = AnnotationReferences::new("refract.dev");
        let mut meta = ObjectMeta::new("other", "input");
        assert!(strategy.add_reference(&mut meta, &owner("ns")));
        assert!(!strategy.add_reference(&mut meta, &owner("ns")));
        assert_eq!(
            meta.annotations.get("secrettransform.refract.dev/ns/t").map(String::as_str),
            Some("true")
        );
        assert!(strategy.del_reference(&mut meta, &owner("ns")));
        assert!(!strategy.del_reference(&mut meta, &owner("ns")));
        assert!(meta.annotations.is_empty());
    }

    #[test]
    fn test_annotation_not_owned_when_value_differs() {
        let strategy = AnnotationReferences::new("refract.dev");
        let mut meta = ObjectMeta::new("ns", "input");
        meta.annotations
            .insert("secrettransform.refract.dev/ns/t".into(), "false".into());
        assert!(!strategy.del_reference(&mut meta, &owner("ns")));
        assert!(strategy.add_reference(&mut meta, &owner("ns")));
    }

    #[test]
    fn test_combined_picks_by_namespace() {
        let strategy = CombinedReferences::new("refract.dev");
        let mut same = ObjectMeta::new("ns", "a");
        let mut other = ObjectMeta::new("elsewhere", "b");
        assert!(strategy.add_reference(&mut same, &owner("ns")));
        assert!(strategy.add_reference(&mut other, &owner("ns")));
        assert_eq!(same.owner_references.len(), 1);
        assert!(same.annotations.is_empty());
        assert!(other.owner_references.is_empty());
        assert_eq!(other.annotations.len(), 1);
        assert!(strategy.del_reference(&mut same, &owner("ns")));
        assert!(strategy.del_reference(&mut other, &owner("ns")));
    }

    #[test]
    fn test_parse_annotation_key() {
        assert_eq!(
            parse_annotation_key("secrettransform.refract.dev/ns/t", "refract.dev"),
            Some(("ns".to_string(), "t".to_string()))
        );
        assert_eq!(parse_annotation_key("secrettransform.example.com/ns/t", "refract.dev"), None);
        assert_eq!(parse_annotation_key("refract.dev/ns/t", "refract.dev"), None);
        assert_eq!(parse_annotation_key("secrettransform.refract.dev/ns", "refract.dev"), None);
        assert_eq!(parse_annotation_key("secrettransform.refract.dev/ns/a/b", "refract.dev"), None);
    }
}
