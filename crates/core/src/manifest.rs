//! Multi-document YAML manifests.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::resources::Resource;

/// Parse every YAML document in `text` into a resource.
///
/// Empty documents are skipped.
///
/// # Errors
///
/// Returns [`Error::ManifestParse`] naming the failing document index.
pub fn parse_manifests(text: &str) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| Error::manifest_parse(format!("document {index}: {e}")))?;
        if value.is_null() {
            continue;
        }
        let resource: Resource = serde_yaml::from_value(value)
            .map_err(|e| Error::manifest_parse(format!("document {index}: {e}")))?;
        resource.validate()?;
        resources.push(resource);
    }
    Ok(resources)
}

/// Render resources as a multi-document YAML stream.
///
/// # Errors
///
/// Returns [`Error::ManifestParse`] if a resource cannot be serialised.
pub fn render_manifests(resources: &[Resource]) -> Result<String> {
    resources
        .iter()
        .map(|r| serde_yaml::to_string(r).map_err(|e| Error::manifest_parse(e.to_string())))
        .collect::<Result<Vec<_>>>()
        .map(|docs| docs.join("---\n"))
}
