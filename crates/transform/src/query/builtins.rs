//! The builtin function library.
//!
//! Builtins come in two flavors. Filter builtins receive their arguments as
//! expressions and decide how to evaluate them. Value builtins see one
//! combination of argument outputs at a time, the first argument varying
//! slowest, and most of them produce exactly one result per combination.

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

use super::ast::Expr;
use super::interp::{Env, EvalError, EvalResult, Interp, Sink, update_each};
use super::path::{
    Path, delpaths, getpath, index, iterate, limit_count, recurse_paths, recurse_values, setpath,
};
use super::value::{
    add, as_f64, compare, describe, equals, number, parse_number, split_string, to_text, truthy,
    type_name,
};

/// Builtins that take their arguments as filters.
const FILTER_BUILTINS: &[&str] = &[
    "empty/0",
    "path/1",
    "paths/0",
    "paths/1",
    "leaf_paths/0",
    "del/1",
    "pick/1",
    "map/1",
    "map_values/1",
    "select/1",
    "with_entries/1",
    "recurse/0",
    "recurse/1",
    "recurse/2",
    "repeat/1",
    "walk/1",
    "first/1",
    "last/1",
    "limit/2",
    "nth/2",
    "isempty/1",
    "any/1",
    "any/2",
    "all/1",
    "all/2",
    "sort_by/1",
    "group_by/1",
    "unique_by/1",
    "min_by/1",
    "max_by/1",
    "while/2",
    "until/2",
    "add/1",
    "debug/0",
    "debug/1",
    "values/0",
    "arrays/0",
    "objects/0",
    "iterables/0",
    "booleans/0",
    "numbers/0",
    "strings/0",
    "nulls/0",
    "scalars/0",
    "sub/2",
    "sub/3",
    "gsub/2",
    "gsub/3",
];

/// Builtins applied to each combination of argument values.
const VALUE_BUILTINS: &[&str] = &[
    "error/0",
    "error/1",
    "not/0",
    "length/0",
    "utf8bytelength/0",
    "keys/0",
    "keys_unsorted/0",
    "add/0",
    "any/0",
    "all/0",
    "flatten/0",
    "flatten/1",
    "floor/0",
    "ceil/0",
    "round/0",
    "sqrt/0",
    "abs/0",
    "fabs/0",
    "log/0",
    "log2/0",
    "log10/0",
    "exp/0",
    "exp2/0",
    "exp10/0",
    "pow/2",
    "tostring/0",
    "tonumber/0",
    "tojson/0",
    "fromjson/0",
    "type/0",
    "ascii_downcase/0",
    "ascii_upcase/0",
    "trim/0",
    "ltrim/0",
    "rtrim/0",
    "ltrimstr/1",
    "rtrimstr/1",
    "startswith/1",
    "endswith/1",
    "split/1",
    "split/2",
    "splits/1",
    "splits/2",
    "join/1",
    "test/1",
    "test/2",
    "match/1",
    "match/2",
    "capture/1",
    "capture/2",
    "scan/1",
    "scan/2",
    "contains/1",
    "inside/1",
    "has/1",
    "in/1",
    "index/1",
    "rindex/1",
    "indices/1",
    "nth/1",
    "getpath/1",
    "setpath/2",
    "delpaths/1",
    "to_entries/0",
    "from_entries/0",
    "sort/0",
    "unique/0",
    "min/0",
    "max/0",
    "reverse/0",
    "first/0",
    "last/0",
    "implode/0",
    "explode/0",
    "transpose/0",
    "toarray/0",
    "env/0",
    "range/1",
    "range/2",
    "range/3",
];

fn listed(table: &[&str], name: &str, arity: usize) -> bool {
    let key = format!("{name}/{arity}");
    table.contains(&key.as_str())
}

/// Whether `name/arity` names a builtin.
pub fn is_defined(name: &str, arity: usize) -> bool {
    listed(FILTER_BUILTINS, name, arity) || listed(VALUE_BUILTINS, name, arity)
}

fn not_defined(name: &str, arity: usize) -> EvalError {
    EvalError::msg(format!("{name}/{arity} is not defined"))
}

fn elements(value: &Value) -> EvalResult<Vec<&Value>> {
    match value {
        Value::Array(items) => Ok(items.iter().collect()),
        Value::Object(map) => Ok(map.values().collect()),
        other => Err(EvalError::msg(format!(
            "Cannot iterate over {}",
            describe(other)
        ))),
    }
}

fn length(value: &Value) -> EvalResult<Value> {
    match value {
        Value::Null => Ok(Value::from(0)),
        Value::Bool(_) => Err(EvalError::msg(format!(
            "{} has no length",
            describe(value)
        ))),
        Value::Number(n) => Ok(n
            .as_i64()
            .and_then(i64::checked_abs)
            .map_or_else(|| number(as_f64(value).unwrap_or(0.0).abs()), Value::from)),
        Value::String(s) => Ok(Value::from(s.chars().count())),
        Value::Array(items) => Ok(Value::from(items.len())),
        Value::Object(map) => Ok(Value::from(map.len())),
    }
}

fn keys(value: &Value) -> EvalResult<Value> {
    match value {
        Value::Object(map) => Ok(Value::Array(
            map.keys().map(|k| Value::String(k.clone())).collect(),
        )),
        Value::Array(items) => Ok(Value::Array((0..items.len()).map(Value::from).collect())),
        other => Err(EvalError::msg(format!("{} has no keys", describe(other)))),
    }
}

fn add_all(value: &Value) -> EvalResult<Value> {
    elements(value)?
        .into_iter()
        .cloned()
        .try_fold(Value::Null, add)
        .map_err(EvalError::msg)
}

fn flatten(value: &Value, depth: usize) -> EvalResult<Value> {
    let Value::Array(items) = value else {
        return Err(EvalError::msg(format!("Cannot flatten {}", describe(value))));
    };
    let mut flat = Vec::new();
    let mut pending: Vec<(&Value, usize)> = items.iter().rev().map(|item| (item, depth)).collect();
    while let Some((item, depth)) = pending.pop() {
        match item {
            Value::Array(inner) if depth > 0 => {
                pending.extend(inner.iter().rev().map(|i| (i, depth.saturating_sub(1))));
            }
            other => flat.push(other.clone()),
        }
    }
    Ok(Value::Array(flat))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn flatten_to(value: &Value, depth: &Value) -> EvalResult<Value> {
    let depth = as_f64(depth)
        .filter(|d| *d >= 0.0)
        .ok_or_else(|| EvalError::msg("flatten depth must not be negative"))?;
    flatten(value, depth as usize)
}

fn math(name: &str, value: &Value) -> EvalResult<Value> {
    if let Some(n) = value.as_i64() {
        if matches!(name, "floor" | "ceil" | "round") {
            return Ok(Value::from(n));
        }
        if let Some(abs) = n.checked_abs().filter(|_| matches!(name, "abs" | "fabs")) {
            return Ok(Value::from(abs));
        }
    }
    let n = as_f64(value)
        .ok_or_else(|| EvalError::msg(format!("{} number required", describe(value))))?;
    let result = match name {
        "floor" => n.floor(),
        "ceil" => n.ceil(),
        "round" => n.round(),
        "sqrt" => n.sqrt(),
        "log" => n.ln(),
        "log2" => n.log2(),
        "log10" => n.log10(),
        "exp" => n.exp(),
        "exp2" => n.exp2(),
        "exp10" => 10_f64.powf(n),
        _ => n.abs(),
    };
    Ok(number(result))
}

fn pow(base: &Value, exponent: &Value) -> EvalResult<Value> {
    let (Some(b), Some(e)) = (as_f64(base), as_f64(exponent)) else {
        return Err(EvalError::msg("pow requires numeric arguments"));
    };
    Ok(number(b.powf(e)))
}

fn tonumber(value: &Value) -> EvalResult<Value> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => {
            let numeric = !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
            numeric
                .then(|| parse_number(s.strip_prefix('+').unwrap_or(s)))
                .flatten()
                .ok_or_else(|| EvalError::msg(format!("Cannot parse '{s}' as JSON")))
        }
        other => Err(EvalError::msg(format!(
            "{} cannot be parsed as a number",
            describe(other)
        ))),
    }
}

fn fromjson(value: &Value) -> EvalResult<Value> {
    let text = input_string(value, "parsed")?;
    let parsed = serde_json::from_str::<Value>(text)
        .map_err(|e| EvalError::msg(format!("{e} (while parsing '{text}')")))?;
    Interp::bounded(parsed)
}

fn string_op(value: &Value, what: &str, op: impl Fn(&str) -> String) -> EvalResult<Value> {
    match value {
        Value::String(s) => Ok(Value::String(op(s))),
        other => Err(EvalError::msg(format!("{} cannot be {what}", describe(other)))),
    }
}

/// `ltrimstr`/`rtrimstr`: anything that is not a matching string passes through.
fn trim_affix(value: &Value, affix: &Value, prefix: bool) -> Value {
    let (Value::String(s), Value::String(affix)) = (value, affix) else {
        return value.clone();
    };
    let rest = if prefix {
        s.strip_prefix(affix.as_str())
    } else {
        s.strip_suffix(affix.as_str())
    };
    rest.map_or_else(|| value.clone(), |rest| Value::String(rest.to_string()))
}

fn affix_test(name: &str, value: &Value, affix: &Value) -> EvalResult<Value> {
    let (Value::String(s), Value::String(affix)) = (value, affix) else {
        return Err(EvalError::msg(format!("{name}() requires string inputs")));
    };
    Ok(Value::Bool(if name == "startswith" {
        s.starts_with(affix.as_str())
    } else {
        s.ends_with(affix.as_str())
    }))
}

fn split(value: &Value, separator: &Value) -> EvalResult<Value> {
    let (Value::String(s), Value::String(separator)) = (value, separator) else {
        return Err(EvalError::msg("split input and separator must be strings"));
    };
    Ok(split_string(s, separator))
}

fn join(value: &Value, separator: &Value) -> EvalResult<Value> {
    let Value::String(separator) = separator else {
        return Err(EvalError::msg(format!(
            "{} is not a valid separator",
            describe(separator)
        )));
    };
    let parts = elements(value)?
        .into_iter()
        .map(|item| match item {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s.clone()),
            Value::Number(_) | Value::Bool(_) => Ok(item.to_string()),
            other => Err(EvalError::msg(format!(
                "Cannot join with {}",
                describe(other)
            ))),
        })
        .collect::<EvalResult<Vec<_>>>()?;
    Ok(Value::String(parts.join(separator)))
}

fn contains(a: &Value, b: &Value) -> EvalResult<bool> {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            for (key, wanted) in y {
                match x.get(key) {
                    Some(have) if contains(have, wanted)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (Value::Array(x), Value::Array(y)) => {
            for wanted in y {
                let mut found = false;
                for have in x {
                    if type_name(have) == type_name(wanted) && contains(have, wanted)? {
                        found = true;
                        break;
                    }
                }
                if !found {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::String(x), Value::String(y)) => Ok(x.contains(y.as_str())),
        _ if type_name(a) == type_name(b) => Ok(equals(a, b)),
        _ => Err(EvalError::msg(format!(
            "{} and {} cannot have their containment checked",
            describe(a),
            describe(b)
        ))),
    }
}

fn has(container: &Value, key: &Value) -> EvalResult<bool> {
    match (container, key) {
        (Value::Object(map), Value::String(k)) => Ok(map.contains_key(k)),
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        (Value::Array(items), Value::Number(_)) => {
            Ok(as_f64(key).is_some_and(|n| n >= 0.0 && (n as usize) < items.len()))
        }
        _ => Err(EvalError::msg(format!(
            "Cannot check whether {} has a {} key",
            type_name(container),
            type_name(key)
        ))),
    }
}

/// Codepoint offsets where `needle` starts in `text`, overlaps included.
fn string_indices(text: &str, needle: &str) -> Value {
    if needle.is_empty() {
        return Value::Null;
    }
    Value::Array(
        text.char_indices()
            .enumerate()
            .filter(|(_, (byte, _))| text.get(*byte..).is_some_and(|rest| rest.starts_with(needle)))
            .map(|(offset, _)| Value::from(offset))
            .collect(),
    )
}

/// Positions where `window` occurs as a run of elements of `items`.
fn array_indices(items: &[Value], window: &[Value]) -> Value {
    if window.is_empty() {
        return Value::Null;
    }
    Value::Array(
        items
            .windows(window.len())
            .enumerate()
            .filter(|(_, run)| run.iter().zip(window).all(|(a, b)| equals(a, b)))
            .map(|(at, _)| Value::from(at))
            .collect(),
    )
}

fn indices(value: &Value, needle: &Value) -> EvalResult<Value> {
    match (value, needle) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::String(text), Value::String(needle)) => Ok(string_indices(text, needle)),
        (Value::Array(items), Value::Array(window)) => Ok(array_indices(items, window)),
        (Value::Array(items), other) => Ok(array_indices(items, std::slice::from_ref(other))),
        _ => index(value, needle),
    }
}

/// `index` or `rindex`: the first or last of `indices`.
fn index_of(value: &Value, needle: &Value, last: bool) -> EvalResult<Value> {
    Ok(match indices(value, needle)? {
        Value::Array(found) if last => found.last().cloned().unwrap_or(Value::Null),
        Value::Array(found) => found.first().cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    })
}

fn path_keys(path: &Value) -> EvalResult<&[Value]> {
    match path {
        Value::Array(keys) => Ok(keys),
        _ => Err(EvalError::msg("Path must be specified as an array")),
    }
}

fn to_entries(value: &Value) -> EvalResult<Value> {
    let entry = |key: Value, value: &Value| {
        let mut map = Map::new();
        map.insert("key".into(), key);
        map.insert("value".into(), value.clone());
        Value::Object(map)
    };
    let entries = match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| entry(Value::String(k.clone()), v))
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| entry(Value::from(i), v))
            .collect(),
        other => return Err(EvalError::msg(format!("{} has no keys", describe(other)))),
    };
    Interp::bounded(Value::Array(entries))
}

fn from_entries(value: &Value) -> EvalResult<Value> {
    const KEY_FIELDS: [&str; 6] = ["key", "k", "name", "Name", "K", "Key"];
    const VALUE_FIELDS: [&str; 4] = ["value", "v", "Value", "V"];
    let mut result = Map::new();
    for entry in elements(value)? {
        let Value::Object(fields) = entry else {
            return Err(EvalError::msg(format!(
                "Cannot index {} with \"key\"",
                type_name(entry)
            )));
        };
        let key = KEY_FIELDS
            .iter()
            .find_map(|f| fields.get(*f).filter(|k| truthy(k) || k.is_boolean()))
            .cloned()
            .unwrap_or(Value::Null);
        let key = match key {
            Value::String(s) => s,
            Value::Number(_) | Value::Bool(_) | Value::Null => key.to_string(),
            other => {
                return Err(EvalError::msg(format!(
                    "Cannot use {} as object key",
                    describe(&other)
                )));
            }
        };
        let value = VALUE_FIELDS
            .iter()
            .find_map(|f| fields.get(*f))
            .cloned()
            .unwrap_or(Value::Null);
        result.insert(key, value);
    }
    Ok(Value::Object(result))
}

fn sorted(value: &Value) -> EvalResult<Vec<Value>> {
    let Value::Array(items) = value else {
        return Err(EvalError::msg(format!(
            "{} cannot be sorted, as it is not an array",
            describe(value)
        )));
    };
    let mut items = items.clone();
    items.sort_by(compare);
    Ok(items)
}

fn reverse(value: &Value) -> EvalResult<Value> {
    match value {
        Value::Array(items) => Ok(Value::Array(items.iter().rev().cloned().collect())),
        Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
        Value::Null => Ok(Value::Array(Vec::new())),
        other => Err(EvalError::msg(format!("Cannot reverse {}", describe(other)))),
    }
}

fn implode(value: &Value) -> EvalResult<Value> {
    let invalid = || EvalError::msg("Implode input must be an array of codepoints");
    let Value::Array(codes) = value else {
        return Err(invalid());
    };
    codes
        .iter()
        .map(|code| {
            code.as_u64()
                .and_then(|c| u32::try_from(c).ok())
                .and_then(char::from_u32)
                .ok_or_else(invalid)
        })
        .collect::<EvalResult<String>>()
        .map(Value::String)
}

fn explode(value: &Value) -> EvalResult<Value> {
    match value {
        Value::String(s) => Ok(Value::Array(
            s.chars().map(|c| Value::from(u32::from(c))).collect(),
        )),
        other => Err(EvalError::msg(format!(
            "{} cannot be exploded",
            describe(other)
        ))),
    }
}

/// Rows become columns; short rows are padded with null.
fn transpose(value: &Value) -> EvalResult<Value> {
    let rows = elements(value)?;
    let mut width = 0;
    for row in &rows {
        let Value::Array(cells) = row else {
            return Err(EvalError::msg(format!(
                "Cannot index {} with number",
                type_name(row)
            )));
        };
        width = width.max(cells.len());
    }
    let column = |at: usize| {
        Value::Array(
            rows.iter()
                .map(|row| match row {
                    Value::Array(cells) => cells.get(at).cloned().unwrap_or(Value::Null),
                    _ => Value::Null,
                })
                .collect(),
        )
    };
    Ok(Value::Array((0..width).map(column).collect()))
}

fn type_selects(name: &str, value: &Value) -> bool {
    match name {
        "arrays" => value.is_array(),
        "objects" => value.is_object(),
        "iterables" => value.is_array() || value.is_object(),
        "booleans" => value.is_boolean(),
        "numbers" => value.is_number(),
        "strings" => value.is_string(),
        "nulls" => value.is_null(),
        "values" => !value.is_null(),
        _ => !(value.is_array() || value.is_object()),
    }
}

/// A compiled regex plus the flags that change how matches are collected.
struct RegexSpec {
    regex: Regex,
    global: bool,
    skip_empty: bool,
}

/// Compile a regex with jq-style flags. `pattern` may also be a
/// `[regex, flags]` pair when no separate flags are given.
fn compile_regex(pattern: &Value, flags: Option<&Value>) -> EvalResult<RegexSpec> {
    let (pattern, flags) = match (pattern, flags) {
        (Value::Array(pair), None | Some(Value::Null)) => {
            (pair.first().unwrap_or(&Value::Null), pair.get(1))
        }
        other => other,
    };
    let Value::String(pattern) = pattern else {
        return Err(EvalError::msg(format!(
            "{} cannot be matched, as it is not a string",
            describe(pattern)
        )));
    };
    let flags = match flags {
        None | Some(Value::Null) => "",
        Some(Value::String(f)) => f.as_str(),
        Some(other) => {
            return Err(EvalError::msg(format!(
                "{} is not a string",
                describe(other)
            )));
        }
    };
    let mut builder = RegexBuilder::new(pattern);
    let mut global = false;
    let mut skip_empty = false;
    for flag in flags.chars() {
        match flag {
            'g' => global = true,
            'i' => {
                builder.case_insensitive(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'n' => skip_empty = true,
            'p' => {
                builder.dot_matches_new_line(true);
                skip_empty = true;
            }
            'l' => {}
            _ => {
                return Err(EvalError::msg(format!(
                    "{flags} is not a valid modifier string"
                )));
            }
        }
    }
    let regex = builder
        .build()
        .map_err(|e| EvalError::msg(format!("{pattern} (at offset 0) is not a valid regex: {e}")))?;
    Ok(RegexSpec {
        regex,
        global,
        skip_empty,
    })
}

/// A match as `{offset, length, string, captures}`, offsets in codepoints.
fn match_object(regex: &Regex, text: &str, captures: &regex::Captures<'_>) -> Value {
    let offset = |byte: usize| text.get(..byte).map_or(0, |before| before.chars().count());
    let span = |found: regex::Match<'_>, fields: &mut Map<String, Value>| {
        fields.insert("offset".into(), Value::from(offset(found.start())));
        fields.insert("length".into(), Value::from(found.as_str().chars().count()));
        fields.insert("string".into(), Value::String(found.as_str().to_string()));
    };
    let groups = regex
        .capture_names()
        .enumerate()
        .skip(1)
        .map(|(at, name)| {
            let mut group = Map::new();
            match captures.get(at) {
                Some(found) => span(found, &mut group),
                None => {
                    group.insert("offset".into(), Value::from(-1));
                    group.insert("length".into(), Value::from(0));
                    group.insert("string".into(), Value::Null);
                }
            }
            group.insert(
                "name".into(),
                name.map_or(Value::Null, |n| Value::String(n.to_string())),
            );
            Value::Object(group)
        })
        .collect();
    let mut whole = Map::new();
    if let Some(found) = captures.get(0) {
        span(found, &mut whole);
    }
    whole.insert("captures".into(), Value::Array(groups));
    Value::Object(whole)
}

/// Named captures of a match object as `{name: string}`.
fn capture_object(matched: &Value) -> Value {
    let mut named = Map::new();
    if let Some(Value::Array(groups)) = matched.get("captures") {
        for group in groups {
            if let Some(Value::String(name)) = group.get("name") {
                named.insert(
                    name.clone(),
                    group.get("string").cloned().unwrap_or(Value::Null),
                );
            }
        }
    }
    Value::Object(named)
}

/// `scan` output for one match: the whole text, or the captured strings.
fn scan_result(matched: &Value) -> Value {
    match matched.get("captures") {
        Some(Value::Array(groups)) if !groups.is_empty() => Value::Array(
            groups
                .iter()
                .map(|g| g.get("string").cloned().unwrap_or(Value::Null))
                .collect(),
        ),
        _ => matched.get("string").cloned().unwrap_or(Value::Null),
    }
}

fn regex_matches(
    value: &Value,
    pattern: &Value,
    flags: Option<&Value>,
    force_global: bool,
) -> EvalResult<Vec<Value>> {
    let text = input_string(value, "matched")?;
    let spec = compile_regex(pattern, flags)?;
    let global = spec.global || force_global;
    let mut found = Vec::new();
    for captures in spec.regex.captures_iter(text) {
        if spec.skip_empty && captures.get(0).is_some_and(|m| m.as_str().is_empty()) {
            continue;
        }
        found.push(match_object(&spec.regex, text, &captures));
        if !global {
            break;
        }
    }
    Ok(found)
}

fn regex_test(value: &Value, pattern: &Value, flags: Option<&Value>) -> EvalResult<Value> {
    let text = input_string(value, "matched")?;
    Ok(Value::Bool(compile_regex(pattern, flags)?.regex.is_match(text)))
}

fn regex_split(value: &Value, pattern: &Value, flags: Option<&Value>) -> EvalResult<Value> {
    let text = input_string(value, "split")?;
    let spec = compile_regex(pattern, flags)?;
    Ok(Value::Array(
        spec.regex
            .split(text)
            .map(|part| Value::String(part.to_string()))
            .collect(),
    ))
}

fn input_string<'a>(value: &'a Value, what: &str) -> EvalResult<&'a str> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(EvalError::msg(format!(
            "{} cannot be {what}, as it is not a string",
            describe(other)
        ))),
    }
}

/// Value builtins with exactly one result per argument combination.
/// `None` when `name` with these arguments is not one of them.
#[allow(clippy::too_many_lines)]
fn native(name: &str, input: &Value, args: &[Value]) -> Option<EvalResult<Value>> {
    let result = match (name, args) {
        ("error", []) => Err(EvalError::Raised(input.clone())),
        ("error", [message]) => Err(EvalError::Raised(message.clone())),
        ("not", []) => Ok(Value::Bool(!truthy(input))),
        ("length", []) => length(input),
        ("utf8bytelength", []) => input_string(input, "measured").map(|s| Value::from(s.len())),
        ("keys" | "keys_unsorted", []) => keys(input),
        ("add", []) => add_all(input),
        ("any", []) => elements(input).map(|all| Value::Bool(all.into_iter().any(truthy))),
        ("all", []) => elements(input).map(|all| Value::Bool(all.into_iter().all(truthy))),
        ("flatten", []) => flatten(input, usize::MAX),
        ("flatten", [depth]) => flatten_to(input, depth),
        (
            "floor" | "ceil" | "round" | "sqrt" | "abs" | "fabs" | "log" | "log2" | "log10" | "exp"
            | "exp2" | "exp10",
            [],
        ) => math(name, input),
        ("pow", [base, exponent]) => pow(base, exponent),
        ("tostring", []) => Ok(Value::String(to_text(input))),
        ("tonumber", []) => tonumber(input),
        ("tojson", []) => Ok(Value::String(input.to_string())),
        ("fromjson", []) => fromjson(input),
        ("type", []) => Ok(Value::String(type_name(input).to_string())),
        ("ascii_downcase", []) => string_op(input, "lowercased", str::to_ascii_lowercase),
        ("ascii_upcase", []) => string_op(input, "uppercased", str::to_ascii_uppercase),
        ("trim", []) => string_op(input, "trimmed", |s| s.trim().to_string()),
        ("ltrim", []) => string_op(input, "trimmed", |s| s.trim_start().to_string()),
        ("rtrim", []) => string_op(input, "trimmed", |s| s.trim_end().to_string()),
        ("ltrimstr", [prefix]) => Ok(trim_affix(input, prefix, true)),
        ("rtrimstr", [suffix]) => Ok(trim_affix(input, suffix, false)),
        ("startswith" | "endswith", [affix]) => affix_test(name, input, affix),
        ("split", [separator]) => split(input, separator),
        ("split", [pattern, flags]) => regex_split(input, pattern, Some(flags)),
        ("join", [separator]) => join(input, separator),
        ("test", [pattern]) => regex_test(input, pattern, None),
        ("test", [pattern, flags]) => regex_test(input, pattern, Some(flags)),
        ("contains", [other]) => contains(input, other).map(Value::Bool),
        ("inside", [other]) => contains(other, input).map(Value::Bool),
        ("has", [key]) => has(input, key).map(Value::Bool),
        ("in", [container]) => has(container, input).map(Value::Bool),
        ("indices", [needle]) => indices(input, needle),
        ("index", [needle]) => index_of(input, needle, false),
        ("rindex", [needle]) => index_of(input, needle, true),
        ("nth", [n]) => index(input, n),
        ("getpath", [path]) => path_keys(path).and_then(|keys| getpath(input, keys)),
        ("setpath", [path, value]) => {
            path_keys(path).and_then(|keys| setpath(input.clone(), keys, value.clone()))
        }
        ("delpaths", [paths]) => match paths {
            Value::Array(paths) => delpaths(input.clone(), paths.clone()),
            _ => Err(EvalError::msg("Paths must be specified as an array")),
        },
        ("to_entries", []) => to_entries(input),
        ("from_entries", []) => from_entries(input),
        ("sort", []) => sorted(input).map(Value::Array),
        ("unique", []) => sorted(input).map(|mut list| {
            list.dedup_by(|a, b| equals(a, b));
            Value::Array(list)
        }),
        ("min", []) => sorted(input).map(|list| list.into_iter().next().unwrap_or(Value::Null)),
        ("max", []) => sorted(input).map(|mut list| list.pop().unwrap_or(Value::Null)),
        ("reverse", []) => reverse(input),
        ("first", []) => index(input, &Value::from(0)),
        ("last", []) => index(input, &Value::from(-1)),
        ("implode", []) => implode(input),
        ("explode", []) => explode(input),
        ("transpose", []) => transpose(input),
        ("toarray", []) => match input {
            Value::Array(_) => Ok(input.clone()),
            other => Interp::bounded(Value::Array(vec![other.clone()])),
        },
        ("env", []) => Ok(Value::Object(Map::new())),
        _ => return None,
    };
    Some(result)
}

impl Interp {
    /// Dispatch a builtin call.
    #[allow(clippy::too_many_lines)]
    pub(crate) fn call<'q>(
        &self,
        name: &str,
        args: &'q [Expr],
        input: &Value,
        env: &Env<'q>,
        out: &mut Sink<'_>,
    ) -> EvalResult<()> {
        match (name, args) {
            ("empty", []) => Ok(()),
            ("path", [f]) => {
                self.eval_paths(f, &Vec::new(), input, env, &mut |path, _| {
                    out(Value::Array(path))
                })
            }
            ("paths" | "leaf_paths", []) => recurse_paths(&Vec::new(), input, &mut |path, value| {
                if path.is_empty() || (name == "leaf_paths" && !type_selects("scalars", &value)) {
                    return Ok(());
                }
                out(Value::Array(path))
            }),
            ("paths", [f]) => recurse_paths(&Vec::new(), input, &mut |path, value| {
                if path.is_empty() || !self.some_output(f, &value, env, true)? {
                    return Ok(());
                }
                out(Value::Array(path))
            }),
            ("del", [f]) => {
                let paths = self
                    .paths(f, input, env)?
                    .into_iter()
                    .map(|(path, _)| Value::Array(path))
                    .collect();
                out(delpaths(input.clone(), paths)?)
            }
            ("pick", [f]) => {
                let mut picked = Value::Null;
                for (path, _) in self.paths(f, input, env)? {
                    let value = getpath(input, &path)?;
                    picked = setpath(picked, &path, value)?;
                }
                out(picked)
            }
            ("map", [f]) => {
                let mut mapped = Vec::new();
                for item in elements(input)? {
                    self.eval(f, item, env, &mut |value| {
                        mapped.push(value);
                        Ok(())
                    })?;
                }
                out(Self::bounded(Value::Array(mapped))?)
            }
            ("map_values", [f]) => {
                let paths: Vec<Path> = match input {
                    Value::Array(items) => (0..items.len()).map(|i| vec![Value::from(i)]).collect(),
                    Value::Object(map) => map.keys().map(|k| vec![Value::String(k.clone())]).collect(),
                    Value::Null => Vec::new(),
                    other => {
                        return Err(EvalError::msg(format!(
                            "Cannot iterate over {}",
                            describe(other)
                        )));
                    }
                };
                out(update_each(input.clone(), paths, |current| {
                    self.first_output(f, current, env)
                })?)
            }
            ("select", [cond]) => self.eval(cond, input, env, &mut |c| {
                if truthy(&c) {
                    out(input.clone())
                } else {
                    Ok(())
                }
            }),
            ("with_entries", [f]) => {
                let entries = to_entries(input)?;
                let mut mapped = Vec::new();
                for entry in elements(&entries)? {
                    self.eval(f, entry, env, &mut |value| {
                        mapped.push(value);
                        Ok(())
                    })?;
                }
                out(from_entries(&Value::Array(mapped))?)
            }
            ("recurse", []) => recurse_values(input, out),
            ("recurse" | "repeat", [f]) => self.recurse_with(f, None, input, env, out),
            ("recurse", [f, cond]) => self.recurse_with(f, Some(cond), input, env, out),
            ("walk", [f]) => self.walk(f, input, env, out),
            ("first", [f]) => match self.first_output(f, input, env)? {
                Some(value) => out(value),
                None => Ok(()),
            },
            ("last", [f]) => {
                let mut last = None;
                self.eval(f, input, env, &mut |value| {
                    last = Some(value);
                    Ok(())
                })?;
                match last {
                    Some(value) => out(value),
                    None => Ok(()),
                }
            }
            ("limit", [count, f]) => self.eval(count, input, env, &mut |count| {
                match limit_count(&count)? {
                    None => self.eval(f, input, env, out),
                    Some(0) => Ok(()),
                    Some(keep) => self.take(f, keep, input, env, out),
                }
            }),
            ("nth", [n, f]) => self.eval(n, input, env, &mut |n| {
                let Some(keep) = limit_count(&n)? else {
                    return Err(EvalError::msg("Out of bounds negative array index"));
                };
                let mut last = None;
                self.take(f, keep.saturating_add(1), input, env, &mut |value| {
                    last = Some(value);
                    Ok(())
                })?;
                match last {
                    Some(value) => out(value),
                    None => Ok(()),
                }
            }),
            ("isempty", [f]) => out(Value::Bool(self.first_output(f, input, env)?.is_none())),
            ("any", [cond]) => out(Value::Bool(self.any_all(None, cond, input, env, true)?)),
            ("all", [cond]) => out(Value::Bool(!self.any_all(None, cond, input, env, false)?)),
            ("any", [generator, cond]) => out(Value::Bool(
                self.any_all(Some(generator), cond, input, env, true)?,
            )),
            ("all", [generator, cond]) => out(Value::Bool(
                !self.any_all(Some(generator), cond, input, env, false)?,
            )),
            ("sort_by", [f]) => out(Value::Array(
                self.sort_by_keys(input, f, env)?
                    .into_iter()
                    .map(|(_, item)| item)
                    .collect(),
            )),
            ("group_by", [f]) => out(Self::bounded(Value::Array(
                self.groups(input, f, env)?
                    .into_iter()
                    .map(Value::Array)
                    .collect(),
            ))?),
            ("unique_by", [f]) => out(Value::Array(
                self.groups(input, f, env)?
                    .into_iter()
                    .filter_map(|group| group.into_iter().next())
                    .collect(),
            )),
            ("min_by", [f]) => out(self
                .sort_by_keys(input, f, env)?
                .into_iter()
                .next()
                .map_or(Value::Null, |(_, item)| item)),
            ("max_by", [f]) => out(self
                .sort_by_keys(input, f, env)?
                .pop()
                .map_or(Value::Null, |(_, item)| item)),
            ("while", [cond, update]) => {
                let mut current = input.clone();
                loop {
                    self.tick()?;
                    if !self.some_output(cond, &current, env, true)? {
                        return Ok(());
                    }
                    out(current.clone())?;
                    match self.first_output(update, &current, env)? {
                        Some(next) => current = next,
                        None => return Ok(()),
                    }
                }
            }
            ("until", [cond, update]) => {
                let mut current = input.clone();
                loop {
                    self.tick()?;
                    if self.some_output(cond, &current, env, true)? {
                        return out(current);
                    }
                    match self.first_output(update, &current, env)? {
                        Some(next) => current = next,
                        None => return Ok(()),
                    }
                }
            }
            ("add", [f]) => {
                let mut sum = Value::Null;
                self.eval(f, input, env, &mut |value| {
                    sum = add(std::mem::take(&mut sum), value).map_err(EvalError::msg)?;
                    Ok(())
                })?;
                out(sum)
            }
            ("debug", []) => {
                tracing::debug!(value = %input, "query debug");
                out(input.clone())
            }
            ("debug", [message]) => {
                self.eval(message, input, env, &mut |message| {
                    tracing::debug!(message = %to_text(&message), value = %input, "query debug");
                    Ok(())
                })?;
                out(input.clone())
            }
            (
                "values" | "arrays" | "objects" | "iterables" | "booleans" | "numbers" | "strings"
                | "nulls" | "scalars",
                [],
            ) => {
                if type_selects(name, input) {
                    out(input.clone())
                } else {
                    Ok(())
                }
            }
            ("sub" | "gsub", [pattern, replacement]) => {
                self.substitute_call(name, pattern, replacement, None, input, env, out)
            }
            ("sub" | "gsub", [pattern, replacement, flags]) => {
                self.substitute_call(name, pattern, replacement, Some(flags), input, env, out)
            }
            _ if listed(VALUE_BUILTINS, name, args.len()) => {
                self.with_arguments(args, input, env, &mut Vec::new(), &mut |values| {
                    match native(name, input, values) {
                        Some(result) => out(result?),
                        None => self.native_stream(name, input, values, out),
                    }
                })
            }
            _ => Err(not_defined(name, args.len())),
        }
    }

    /// Call `apply` with every combination of argument outputs, the first
    /// argument varying slowest.
    fn with_arguments<'q>(
        &self,
        args: &'q [Expr],
        input: &Value,
        env: &Env<'q>,
        bound: &mut Vec<Value>,
        apply: &mut dyn FnMut(&[Value]) -> EvalResult<()>,
    ) -> EvalResult<()> {
        let Some((arg, rest)) = args.split_first() else {
            return apply(bound);
        };
        self.eval(arg, input, env, &mut |value| {
            bound.push(value);
            let result = self.with_arguments(rest, input, env, bound, apply);
            bound.pop();
            result
        })
    }

    /// Value builtins that emit any number of results.
    fn native_stream(
        &self,
        name: &str,
        input: &Value,
        args: &[Value],
        out: &mut Sink<'_>,
    ) -> EvalResult<()> {
        let one = Value::from(1);
        match (name, args) {
            ("range", [upto]) => self.range(&Value::from(0), upto, &one, out),
            ("range", [from, upto]) => self.range(from, upto, &one, out),
            ("range", [from, upto, by]) => self.range(from, upto, by, out),
            ("match", [pattern]) => regex_matches(input, pattern, None, false)?
                .into_iter()
                .try_for_each(|m| out(m)),
            ("match", [pattern, flags]) => regex_matches(input, pattern, Some(flags), false)?
                .into_iter()
                .try_for_each(|m| out(m)),
            ("capture", [pattern]) => regex_matches(input, pattern, None, false)?
                .iter()
                .try_for_each(|m| out(capture_object(m))),
            ("capture", [pattern, flags]) => regex_matches(input, pattern, Some(flags), false)?
                .iter()
                .try_for_each(|m| out(capture_object(m))),
            ("scan", [pattern]) => regex_matches(input, pattern, None, true)?
                .iter()
                .try_for_each(|m| out(scan_result(m))),
            ("scan", [pattern, flags]) => regex_matches(input, pattern, Some(flags), true)?
                .iter()
                .try_for_each(|m| out(scan_result(m))),
            ("splits", [pattern]) => iterate(&regex_split(input, pattern, None)?, out),
            ("splits", [pattern, flags]) => iterate(&regex_split(input, pattern, Some(flags))?, out),
            _ => Err(not_defined(name, args.len())),
        }
    }

    fn range(&self, from: &Value, upto: &Value, by: &Value, out: &mut Sink<'_>) -> EvalResult<()> {
        let mut produced = 0_u64;
        if let (Some(from), Some(upto), Some(by)) = (from.as_i64(), upto.as_i64(), by.as_i64()) {
            let mut current = from;
            while (by > 0 && current < upto) || (by < 0 && current > upto) {
                if produced % 1024 == 0 {
                    self.tick()?;
                }
                out(Value::from(current))?;
                produced = produced.wrapping_add(1);
                let Some(next) = current.checked_add(by) else {
                    break;
                };
                current = next;
            }
            return Ok(());
        }
        let (Some(from), Some(upto), Some(by)) = (as_f64(from), as_f64(upto), as_f64(by)) else {
            return Err(EvalError::msg("Range bounds must be numeric"));
        };
        let mut current = from;
        while (by > 0.0 && current < upto) || (by < 0.0 && current > upto) {
            if produced % 1024 == 0 {
                self.tick()?;
            }
            out(number(current))?;
            produced = produced.wrapping_add(1);
            current += by;
        }
        Ok(())
    }

    /// The first `keep` outputs of `f`; the rest are never evaluated.
    fn take<'q>(
        &self,
        f: &'q Expr,
        keep: usize,
        input: &Value,
        env: &Env<'q>,
        out: &mut Sink<'_>,
    ) -> EvalResult<()> {
        let id = self.label();
        let mut taken = 0_usize;
        let result = self.eval(f, input, env, &mut |value| {
            taken = taken.saturating_add(1);
            out(value)?;
            if taken >= keep {
                return Err(EvalError::Break(id));
            }
            Ok(())
        });
        Self::landed(id, result)
    }

    /// Whether some item has a `cond` output whose truthiness is `wanted`.
    /// Items come from `generator`, or from iterating the input. Stops at the
    /// first such output.
    fn any_all<'q>(
        &self,
        generator: Option<&'q Expr>,
        cond: &'q Expr,
        input: &Value,
        env: &Env<'q>,
        wanted: bool,
    ) -> EvalResult<bool> {
        let id = self.label();
        let mut decided = false;
        let mut check = |item: Value| {
            if self.some_output(cond, &item, env, wanted)? {
                decided = true;
                return Err(EvalError::Break(id));
            }
            Ok(())
        };
        let result = match generator {
            Some(generator) => self.eval(generator, input, env, &mut check),
            None => iterate(input, &mut check),
        };
        Self::landed(id, result)?;
        Ok(decided)
    }

    fn sort_by_keys<'q>(
        &self,
        input: &Value,
        f: &'q Expr,
        env: &Env<'q>,
    ) -> EvalResult<Vec<(Value, Value)>> {
        let Value::Array(list) = input else {
            return Err(EvalError::msg(format!(
                "{} cannot be sorted, as it is not an array",
                describe(input)
            )));
        };
        let mut keyed = list
            .iter()
            .map(|item| Ok((Value::Array(self.values(f, item, env)?), item.clone())))
            .collect::<EvalResult<Vec<_>>>()?;
        keyed.sort_by(|(a, _), (b, _)| compare(a, b));
        Ok(keyed)
    }

    fn groups<'q>(&self, input: &Value, f: &'q Expr, env: &Env<'q>) -> EvalResult<Vec<Vec<Value>>> {
        let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
        for (key, item) in self.sort_by_keys(input, f, env)? {
            match groups.last_mut() {
                Some((last, members)) if equals(last, &key) => members.push(item),
                _ => groups.push((key, vec![item])),
            }
        }
        Ok(groups.into_iter().map(|(_, members)| members).collect())
    }

    /// `recurse(f)` and `repeat(f)`: each value, then what `f` produces from
    /// it, depth first. Children failing `cond` are skipped with their subtrees.
    fn recurse_with<'q>(
        &self,
        f: &'q Expr,
        cond: Option<&'q Expr>,
        value: &Value,
        env: &Env<'q>,
        out: &mut Sink<'_>,
    ) -> EvalResult<()> {
        let mut pending = vec![value.clone()];
        while let Some(current) = pending.pop() {
            self.tick()?;
            out(current.clone())?;
            let mut children = Vec::new();
            self.eval(f, &current, env, &mut |child| {
                if let Some(cond) = cond {
                    if !self.some_output(cond, &child, env, true)? {
                        return Ok(());
                    }
                }
                children.push(child);
                Ok(())
            })?;
            pending.extend(children.into_iter().rev());
        }
        Ok(())
    }

    fn walk<'q>(&self, f: &'q Expr, value: &Value, env: &Env<'q>, out: &mut Sink<'_>) -> EvalResult<()> {
        let _guard = self.enter()?;
        let rebuilt = match value {
            Value::Array(list) => {
                let mut mapped = Vec::with_capacity(list.len());
                for item in list {
                    self.walk(f, item, env, &mut |walked| {
                        mapped.push(walked);
                        Ok(())
                    })?;
                }
                Value::Array(mapped)
            }
            Value::Object(map) => {
                let mut next = Map::new();
                for (key, item) in map {
                    let id = self.label();
                    let mut first = None;
                    let result = self.walk(f, item, env, &mut |walked| {
                        first = Some(walked);
                        Err(EvalError::Break(id))
                    });
                    Self::landed(id, result)?;
                    if let Some(walked) = first {
                        next.insert(key.clone(), walked);
                    }
                }
                Value::Object(next)
            }
            other => other.clone(),
        };
        self.eval(f, &Self::bounded(rebuilt)?, env, out)
    }

    #[allow(clippy::too_many_arguments)]
    fn substitute_call<'q>(
        &self,
        name: &str,
        pattern: &'q Expr,
        replacement: &'q Expr,
        flags: Option<&'q Expr>,
        input: &Value,
        env: &Env<'q>,
        out: &mut Sink<'_>,
    ) -> EvalResult<()> {
        let text = input_string(input, "matched")?;
        self.eval(pattern, input, env, &mut |pattern| {
            let mut with_flags = |flags: Option<&Value>| {
                let spec = compile_regex(&pattern, flags)?;
                let global = spec.global || name == "gsub";
                for result in self.substitute(&spec, text, replacement, global, env)? {
                    out(result)?;
                }
                Ok(())
            };
            match flags {
                Some(flags) => self.eval(flags, input, env, &mut |flags| with_flags(Some(&flags))),
                None => with_flags(None),
            }
        })
    }

    fn substitute<'q>(
        &self,
        spec: &RegexSpec,
        text: &str,
        replacement: &'q Expr,
        global: bool,
        env: &Env<'q>,
    ) -> EvalResult<Vec<Value>> {
        let mut results = vec![String::new()];
        let mut last_end = 0usize;
        for captures in spec.regex.captures_iter(text) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            if spec.skip_empty && whole.as_str().is_empty() {
                continue;
            }
            let prefix = text.get(last_end..whole.start()).unwrap_or_default();
            let named = capture_object(&match_object(&spec.regex, text, &captures));
            let replacements = self
                .values(replacement, &named, env)?
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    other => Err(EvalError::msg(format!(
                        "{} cannot be added to a string",
                        describe(&other)
                    ))),
                })
                .collect::<EvalResult<Vec<_>>>()?;
            results = results
                .iter()
                .flat_map(|acc| {
                    replacements
                        .iter()
                        .map(move |r| format!("{acc}{prefix}{r}"))
                })
                .collect();
            last_end = whole.end();
            if !global {
                break;
            }
        }
        let rest = text.get(last_end..).unwrap_or_default();
        Ok(results
            .into_iter()
            .map(|acc| Value::String(acc + rest))
            .collect())
    }
}
