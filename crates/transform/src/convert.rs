//! Conversions at the engine boundary.
//!
//! Inputs enter the engine as `{"string": raw, "object": parsed-or-null}`
//! per entry. Outputs leave it as text or byte maps: strings pass through,
//! null becomes empty, and every other value is written as compact JSON.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::ConvertError;

/// One bundle entry with its two views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub string: String,
    /// Structured form; `None` when the text is not a mapping.
    pub object: Option<Map<String, Value>>,
}

impl ResolvedInput {
    /// Build both views of a text entry. Parse failures leave `object` empty.
    pub fn parse_text_entry(text: &str) -> Self {
        Self {
            string: text.to_string(),
            object: parse_structured(text),
        }
    }

    /// Build both views of a binary entry, decoding it as UTF-8.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::parse_text_entry(&String::from_utf8_lossy(bytes))
    }

    pub fn to_value(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("string".into(), Value::String(self.string.clone()));
        entry.insert(
            "object".into(),
            self.object.clone().map_or(Value::Null, Value::Object),
        );
        Value::Object(entry)
    }
}

/// Parse text as JSON, then YAML. Only mappings count.
pub fn parse_structured(text: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        return Some(map);
    }
    match serde_yaml::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// The scope queries run against: logical input name to bundle entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputScope {
    inputs: BTreeMap<String, BTreeMap<String, ResolvedInput>>,
}

impl InputScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a text bundle (ConfigMap data) under `name`.
    pub fn insert_text_bundle(&mut self, name: impl Into<String>, data: &BTreeMap<String, String>) {
        let entries = data
            .iter()
            .map(|(key, text)| (key.clone(), ResolvedInput::parse_text_entry(text)))
            .collect();
        self.inputs.insert(name.into(), entries);
    }

    /// Add a binary bundle (Secret data) under `name`.
    pub fn insert_binary_bundle(
        &mut self,
        name: impl Into<String>,
        data: &BTreeMap<String, Vec<u8>>,
    ) {
        let entries = data
            .iter()
            .map(|(key, bytes)| (key.clone(), ResolvedInput::from_bytes(bytes)))
            .collect();
        self.inputs.insert(name.into(), entries);
    }

    pub fn get(&self, name: &str) -> Option<&BTreeMap<String, ResolvedInput>> {
        self.inputs.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// The JSON value queries see.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.inputs
                .iter()
                .map(|(name, entries)| (name.clone(), entries_value(entries)))
                .collect(),
        )
    }
}

fn entries_value(entries: &BTreeMap<String, ResolvedInput>) -> Value {
    Value::Object(
        entries
            .iter()
            .map(|(key, input)| (key.clone(), input.to_value()))
            .collect(),
    )
}

/// The query view of a single text bundle.
pub fn input_map_from_text(data: &BTreeMap<String, String>) -> Value {
    Value::Object(
        data.iter()
            .map(|(key, text)| (key.clone(), ResolvedInput::parse_text_entry(text).to_value()))
            .collect(),
    )
}

/// The query view of a single binary bundle.
pub fn input_map_from_bytes(data: &BTreeMap<String, Vec<u8>>) -> Value {
    Value::Object(
        data.iter()
            .map(|(key, bytes)| (key.clone(), ResolvedInput::from_bytes(bytes).to_value()))
            .collect(),
    )
}

/// Encode one field value as text.
pub fn encode_text(key: &str, value: &Value) -> Result<String, ConvertError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        other => serde_json::to_string(other).map_err(|e| ConvertError::marshal(key, e.to_string())),
    }
}

/// Encode one field value as bytes.
pub fn encode_bytes(key: &str, value: &Value) -> Result<Vec<u8>, ConvertError> {
    encode_text(key, value).map(String::into_bytes)
}

/// Text map for a ConfigMap payload.
pub fn text_map_from_output(
    fields: &BTreeMap<String, Value>,
) -> Result<BTreeMap<String, String>, ConvertError> {
    fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), encode_text(key, value)?)))
        .collect()
}

/// Byte map for a Secret payload.
pub fn bytes_map_from_output(
    fields: &BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Vec<u8>>, ConvertError> {
    fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), encode_bytes(key, value)?)))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn input_strings() -> BTreeMap<String, String> {
        [("str", "value1"), ("num", "7"), ("obj", "prop: x")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn output_values() -> BTreeMap<String, Value> {
        [
            ("str", json!("value1")),
            ("num", json!(7)),
            ("obj", json!({"prop": "x"})),
            ("nil", Value::Null),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    fn expected_input_map() -> Value {
        json!({
            "str": {"string": "value1", "object": null},
            "num": {"string": "7", "object": null},
            "obj": {"string": "prop: x", "object": {"prop": "x"}},
        })
    }

    fn expected_strings() -> BTreeMap<String, String> {
        [("str", "value1"), ("num", "7"), ("obj", r#"{"prop":"x"}"#), ("nil", "")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_input_map_from_text() {
        assert_eq!(input_map_from_text(&input_strings()), expected_input_map());
    }

    #[test]
    fn test_input_map_from_bytes() {
        let bytes = input_strings()
            .into_iter()
            .map(|(k, v)| (k, v.into_bytes()))
            .collect();
        assert_eq!(input_map_from_bytes(&bytes), expected_input_map());
    }

    #[test]
    fn test_text_map_from_output() {
        assert_eq!(text_map_from_output(&output_values()).unwrap(), expected_strings());
    }

    #[test]
    fn test_bytes_map_from_output() {
        let expected: BTreeMap<String, Vec<u8>> = expected_strings()
            .into_iter()
            .map(|(k, v)| (k, v.into_bytes()))
            .collect();
        assert_eq!(bytes_map_from_output(&output_values()).unwrap(), expected);
    }

    #[test]
    fn test_structured_view_only_for_mappings() {
        assert!(parse_structured("- a\n- b").is_none());
        assert!(parse_structured("").is_none());
        assert!(parse_structured("{not json").is_none());
        assert_eq!(
            parse_structured(r#"{"auths": {"r": {}}}"#),
            json!({"auths": {"r": {}}}).as_object().cloned()
        );
        assert_eq!(ResolvedInput::from_bytes(&[0xff, b'a']).string, "\u{fffd}a");
    }

    #[test]
    fn test_scope_value() {
        let mut scope = InputScope::new();
        scope.insert_text_bundle("cfg", &input_strings());
        scope.insert_binary_bundle("sec", &BTreeMap::from([("k".to_string(), b"v".to_vec())]));
        assert_eq!(scope.len(), 2);
        assert_eq!(scope.names().collect::<Vec<_>>(), vec!["cfg", "sec"]);
        let value = scope.to_value();
        assert_eq!(value["cfg"], expected_input_map());
        assert_eq!(value["sec"]["k"], json!({"string": "v", "object": null}));
    }

    proptest! {
        #[test]
        fn prop_text_passes_through(text in ".*") {
            let entry = ResolvedInput::parse_text_entry(&text);
            let encoded = encode_text("k", &Value::String(entry.string)).unwrap();
            prop_assert_eq!(encoded, text);
        }

        #[test]
        fn prop_structured_values_decode_back(
            map in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..6),
            flag in any::<bool>(),
        ) {
            let value = json!({"numbers": map, "flag": flag});
            let encoded = encode_text("k", &value).unwrap();
            let decoded: Value = serde_json::from_str(&encoded).unwrap();
            prop_assert_eq!(decoded, value);
        }
    }
}
