//! `@format` string encoders.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde_json::Value;

use super::interp::{EvalError, EvalResult};
use super::value::{describe, to_text};

/// `@base64d` accepts missing padding and ignores leftover bits of a
/// truncated final group.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Apply the named format to a value, producing a string.
pub fn apply(name: &str, value: &Value) -> EvalResult<Value> {
    let text = match name {
        "text" => to_text(value),
        "json" => value.to_string(),
        "base64" => STANDARD.encode(to_text(value)),
        "base64d" => base64_decode(value)?,
        "uri" => uri_escape(&to_text(value)),
        "html" => html_escape(&to_text(value)),
        "sh" => shell_quote(value)?,
        "csv" => delimited(value, "csv", ",", csv_field)?,
        "tsv" => delimited(value, "tsv", "\t", tsv_field)?,
        other => return Err(EvalError::msg(format!("{other} is not a valid format"))),
    };
    Ok(Value::String(text))
}

fn base64_decode(value: &Value) -> EvalResult<String> {
    let text = to_text(value);
    let mut trimmed = text.trim_end_matches('=');
    if trimmed.len() % 4 == 1 {
        // a lone trailing symbol carries no complete byte
        trimmed = trimmed.get(..trimmed.len().saturating_sub(1)).unwrap_or_default();
    }
    let bytes = LENIENT.decode(trimmed).map_err(|_| {
        EvalError::msg(format!("{} is not valid base64 data", describe(value)))
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn uri_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for byte in text.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("%{byte:02X}"));
        }
    }
    escaped
}

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '\'' => escaped.push_str("&#39;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn shell_word(value: &Value) -> EvalResult<String> {
    match value {
        Value::String(s) => Ok(format!("'{}'", s.replace('\'', "'\\''"))),
        Value::Array(_) | Value::Object(_) => Err(EvalError::msg(format!(
            "{} can not be escaped for shell",
            describe(value)
        ))),
        other => Ok(other.to_string()),
    }
}

fn shell_quote(value: &Value) -> EvalResult<String> {
    match value {
        Value::Array(items) => Ok(items
            .iter()
            .map(shell_word)
            .collect::<EvalResult<Vec<_>>>()?
            .join(" ")),
        other => shell_word(other),
    }
}

fn csv_field(value: &Value) -> EvalResult<String> {
    match value {
        Value::String(s) => Ok(format!("\"{}\"", s.replace('"', "\"\""))),
        Value::Null => Ok(String::new()),
        Value::Number(_) | Value::Bool(_) => Ok(value.to_string()),
        other => Err(EvalError::msg(format!(
            "{} is not valid in a csv row",
            describe(other)
        ))),
    }
}

fn tsv_field(value: &Value) -> EvalResult<String> {
    match value {
        Value::String(s) => Ok(s
            .replace('\\', "\\\\")
            .replace('\t', "\\t")
            .replace('\n', "\\n")
            .replace('\r', "\\r")),
        Value::Null => Ok(String::new()),
        Value::Number(_) | Value::Bool(_) => Ok(value.to_string()),
        other => Err(EvalError::msg(format!(
            "{} is not valid in a tsv row",
            describe(other)
        ))),
    }
}

fn delimited(
    value: &Value,
    name: &str,
    separator: &str,
    field: fn(&Value) -> EvalResult<String>,
) -> EvalResult<String> {
    let Value::Array(items) = value else {
        return Err(EvalError::msg(format!(
            "{} cannot be {name}-formatted, only an array can be",
            describe(value)
        )));
    };
    Ok(items
        .iter()
        .map(field)
        .collect::<EvalResult<Vec<_>>>()?
        .join(separator))
}
