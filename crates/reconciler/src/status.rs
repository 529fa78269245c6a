//! Status bookkeeping: the output hash and the write-skip decision.

use refract_core::{Condition, SecretTransformStatus};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::plan::{Payload, PlannedOutput};

/// Lowercase hex SHA-256 over the ordered outputs.
#[must_use]
pub fn output_hash(outputs: &[PlannedOutput]) -> String {
    let canonical: Vec<Value> = outputs
        .iter()
        .map(|output| {
            let (secret_type, data) = match &output.payload {
                Payload::Text(data) => (Value::Null, json!(data)),
                Payload::Binary { secret_type, data } => (json!(secret_type), json!(data)),
            };
            json!({
                "kind": output.key.kind.as_str(),
                "namespace": output.key.namespace,
                "name": output.key.name,
                "type": secret_type,
                "data": data,
            })
        })
        .collect();
    let digest = Sha256::digest(Value::Array(canonical).to_string().as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Fold a pass outcome into `status`.
///
/// `previous` is the status as loaded at the start of the pass; `status`
/// may already carry a new reference set. `hash` is only given on success.
/// Returns whether anything differs from `previous`.
pub fn apply_outcome(
    status: &mut SecretTransformStatus,
    previous: &SecretTransformStatus,
    generation: i64,
    condition: Condition,
    hash: Option<String>,
) -> bool {
    let mut changed = status.set_condition(condition);
    if let Some(hash) = hash {
        if status.output_hash != hash {
            status.output_hash = hash;
            changed = true;
        }
    }
    if status.observed_generation != generation {
        status.observed_generation = generation;
        changed = true;
    }
    changed || status.managed_references != previous.managed_references
}
