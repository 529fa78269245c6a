//! Value semantics: ordering, truthiness and the arithmetic operators.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::ast::BinOp;

/// Values built during evaluation never nest deeper than this.
pub const MAX_VALUE_DEPTH: usize = 512;

/// First float outside the `i64` range.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Build a number, keeping integral results integral. Infinities clamp to
/// the largest finite double and NaN becomes null.
#[allow(clippy::cast_possible_truncation)]
pub fn number(n: f64) -> Value {
    if n.is_nan() {
        return Value::Null;
    }
    if n.is_infinite() {
        return serde_json::Number::from_f64(f64::MAX.copysign(n)).map_or(Value::Null, Value::Number);
    }
    if n.fract() == 0.0 && n.abs() < I64_BOUND {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

/// Parse number text, keeping integer literals exact when they fit 64 bits.
pub fn parse_number(text: &str) -> Option<Value> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = text.parse::<i64>() {
            return Some(Value::from(n));
        }
        if let Ok(n) = text.parse::<u64>() {
            return Some(Value::from(n));
        }
    }
    text.parse::<f64>().ok().map(number)
}

/// Whether `value` nests containers more than `limit` levels deep.
pub fn deeper_than(value: &Value, limit: usize) -> bool {
    let below = limit.checked_sub(1);
    match value {
        Value::Array(items) => below.is_none_or(|below| items.iter().any(|item| deeper_than(item, below))),
        Value::Object(map) => below.is_none_or(|below| map.values().any(|item| deeper_than(item, below))),
        _ => false,
    }
}

/// Integer arithmetic stays exact while it fits `i64`; anything else goes
/// through doubles.
fn arith(
    x: &serde_json::Number,
    y: &serde_json::Number,
    exact: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> Value {
    if let Some(n) = x.as_i64().zip(y.as_i64()).and_then(|(a, b)| exact(a, b)) {
        return Value::from(n);
    }
    number(float(x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0)))
}

pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

pub const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub const fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Text form used by `tostring`, string interpolation and `@text`.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `type (value)` as used in error messages, with long values elided.
pub fn describe(value: &Value) -> String {
    let json = value.to_string();
    let shown: String = if json.chars().count() > 30 {
        let head: String = json.chars().take(27).collect();
        format!("{head}...")
    } else {
        json
    };
    format!("{} ({shown})", type_name(value))
}

const fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Total order: null < false < true < numbers < strings < arrays < objects.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let keys = x.keys().cmp(y.keys());
            if keys != Ordering::Equal {
                return keys;
            }
            for (key, l) in x {
                let ord = y.get(key).map_or(Ordering::Greater, |r| compare(l, r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => Ordering::Equal,
    }
}

pub fn equals(a: &Value, b: &Value) -> bool {
    compare(a, b) == Ordering::Equal
}

/// Recursively merge `rhs` into `lhs`; nested objects merge, anything else is replaced.
pub fn deep_merge(mut lhs: Map<String, Value>, rhs: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in rhs {
        let merged = match (lhs.remove(&key), value) {
            (Some(Value::Object(l)), Value::Object(r)) => Value::Object(deep_merge(l, r)),
            (_, r) => r,
        };
        lhs.insert(key, merged);
    }
    lhs
}

fn repeat_string(s: &str, times: f64) -> Value {
    if times <= 0.0 {
        return Value::Null;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let count = times.ceil() as usize;
    Value::String(s.repeat(count.max(1)))
}

/// Apply a binary operator.
pub fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, String> {
    match op {
        BinOp::Add => add(lhs, rhs),
        BinOp::Sub => subtract(lhs, rhs),
        BinOp::Mul => multiply(lhs, rhs),
        BinOp::Div => divide(lhs, rhs),
        BinOp::Mod => modulo(&lhs, &rhs),
        BinOp::Eq => Ok(Value::Bool(equals(&lhs, &rhs))),
        BinOp::Ne => Ok(Value::Bool(!equals(&lhs, &rhs))),
        BinOp::Lt => Ok(Value::Bool(compare(&lhs, &rhs) == Ordering::Less)),
        BinOp::Le => Ok(Value::Bool(compare(&lhs, &rhs) != Ordering::Greater)),
        BinOp::Gt => Ok(Value::Bool(compare(&lhs, &rhs) == Ordering::Greater)),
        BinOp::Ge => Ok(Value::Bool(compare(&lhs, &rhs) != Ordering::Less)),
    }
}

pub fn add(lhs: Value, rhs: Value) -> Result<Value, String> {
    match (lhs, rhs) {
        (Value::Null, r) => Ok(r),
        (l, Value::Null) => Ok(l),
        (Value::Number(x), Value::Number(y)) => Ok(arith(&x, &y, i64::checked_add, |a, b| a + b)),
        (Value::String(x), Value::String(y)) => Ok(Value::String(x + &y)),
        (Value::Array(mut x), Value::Array(y)) => {
            x.extend(y);
            Ok(Value::Array(x))
        }
        (Value::Object(mut x), Value::Object(y)) => {
            x.extend(y);
            Ok(Value::Object(x))
        }
        (l, r) => Err(format!("{} and {} cannot be added", describe(&l), describe(&r))),
    }
}

fn subtract(lhs: Value, rhs: Value) -> Result<Value, String> {
    match (lhs, rhs) {
        (Value::Number(x), Value::Number(y)) => Ok(arith(&x, &y, i64::checked_sub, |a, b| a - b)),
        (Value::Array(x), Value::Array(y)) => Ok(Value::Array(
            x.into_iter()
                .filter(|item| !y.iter().any(|r| equals(item, r)))
                .collect(),
        )),
        (l, r) => Err(format!(
            "{} and {} cannot be subtracted",
            describe(&l),
            describe(&r)
        )),
    }
}

fn multiply(lhs: Value, rhs: Value) -> Result<Value, String> {
    match (lhs, rhs) {
        (Value::Number(x), Value::Number(y)) => Ok(arith(&x, &y, i64::checked_mul, |a, b| a * b)),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            Ok(repeat_string(&s, n.as_f64().unwrap_or(0.0)))
        }
        (Value::Object(x), Value::Object(y)) => Ok(Value::Object(deep_merge(x, y))),
        (l, r) => Err(format!(
            "{} and {} cannot be multiplied",
            describe(&l),
            describe(&r)
        )),
    }
}

fn divide(lhs: Value, rhs: Value) -> Result<Value, String> {
    match (lhs, rhs) {
        (Value::Number(x), Value::Number(y)) => {
            let divisor = y.as_f64().unwrap_or(0.0);
            if divisor == 0.0 {
                return Err(format!(
                    "{} and {} cannot be divided because the divisor is zero",
                    describe(&Value::Number(x)),
                    describe(&Value::Number(y))
                ));
            }
            Ok(number(x.as_f64().unwrap_or(0.0) / divisor))
        }
        (Value::String(x), Value::String(y)) => Ok(split_string(&x, &y)),
        (l, r) => Err(format!(
            "{} and {} cannot be divided",
            describe(&l),
            describe(&r)
        )),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn modulo(lhs: &Value, rhs: &Value) -> Result<Value, String> {
    match (as_f64(lhs), as_f64(rhs)) {
        (Some(x), Some(y)) => {
            let (x, y) = (x.trunc() as i64, y.trunc() as i64);
            if y == 0 {
                return Err(format!(
                    "{} and {} cannot be divided because the divisor is zero",
                    describe(lhs),
                    describe(rhs)
                ));
            }
            Ok(Value::from(x.wrapping_rem(y.wrapping_abs())))
        }
        _ => Err(format!(
            "{} and {} cannot be divided",
            describe(lhs),
            describe(rhs)
        )),
    }
}

/// Split a string on a separator; an empty separator splits into characters.
pub fn split_string(s: &str, separator: &str) -> Value {
    if s.is_empty() {
        return Value::Array(Vec::new());
    }
    if separator.is_empty() {
        return Value::Array(s.chars().map(|c| Value::String(c.to_string())).collect());
    }
    Value::Array(
        s.split(separator)
            .map(|part| Value::String(part.to_string()))
            .collect(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_normalizes_integral_floats() {
        assert_eq!(number(3.0), json!(3));
        assert_eq!(number(2.5), json!(2.5));
        assert_eq!(number(1e18), json!(1_000_000_000_000_000_000_i64));
        assert_eq!(number(f64::NAN), Value::Null);
        assert_eq!(number(f64::INFINITY), json!(f64::MAX));
        assert_eq!(number(f64::NEG_INFINITY), json!(-f64::MAX));
    }

    #[test]
    fn test_parse_number_keeps_large_integers() {
        let big = parse_number("9007199254740993").unwrap();
        assert_eq!(big.to_string(), "9007199254740993");
        assert_eq!(parse_number("18446744073709551615").unwrap(), json!(u64::MAX));
        assert_eq!(parse_number("1e1000").unwrap().to_string(), "1.7976931348623157e308");
        assert_eq!(parse_number("1.5").unwrap(), json!(1.5));
        assert!(parse_number("abc").is_none());
    }

    #[test]
    fn test_depth_measure() {
        assert!(!deeper_than(&json!(1), 0));
        assert!(deeper_than(&json!([]), 0));
        assert!(!deeper_than(&json!([[1]]), 2));
        assert!(deeper_than(&json!([[1]]), 1));
        assert!(deeper_than(&json!({"a": {"b": {}}}), 2));
    }

    #[test]
    fn test_ordering_across_types() {
        let mut values = vec![
            json!({"a": 1}),
            json!([1]),
            json!("a"),
            json!(1),
            json!(true),
            json!(false),
            Value::Null,
        ];
        values.sort_by(compare);
        assert_eq!(
            values,
            vec![
                Value::Null,
                json!(false),
                json!(true),
                json!(1),
                json!("a"),
                json!([1]),
                json!({"a": 1})
            ]
        );
        assert!(equals(&json!(1), &json!(1.0)));
        assert!(!equals(&json!(9_007_199_254_740_993_i64), &json!(9_007_199_254_740_992_i64)));
    }

    #[test]
    fn test_add_semantics() {
        assert_eq!(add(Value::Null, json!(1)).unwrap(), json!(1));
        assert_eq!(
            add(json!(9_007_199_254_740_993_i64), json!(0)).unwrap().to_string(),
            "9007199254740993"
        );
        assert_eq!(add(json!(i64::MAX), json!(1)).unwrap(), json!(9.223_372_036_854_776e18));
        assert_eq!(add(json!(0.5), json!(1)).unwrap(), json!(1.5));
        assert_eq!(add(json!([1]), json!([2])).unwrap(), json!([1, 2]));
        assert_eq!(
            add(json!({"a": {"b": 1}}), json!({"a": {"c": 2}})).unwrap(),
            json!({"a": {"c": 2}})
        );
        let err = add(json!(1), json!("a")).unwrap_err();
        assert_eq!(err, r#"number (1) and string ("a") cannot be added"#);
    }

    #[test]
    fn test_multiply_deep_merges_objects() {
        let merged = multiply(json!({"a": {"b": 1}, "x": 1}), json!({"a": {"c": 2}})).unwrap();
        assert_eq!(merged, json!({"a": {"b": 1, "c": 2}, "x": 1}));
        assert_eq!(multiply(json!("ab"), json!(2)).unwrap(), json!("abab"));
        assert_eq!(multiply(json!("ab"), json!(0)).unwrap(), Value::Null);
    }

    #[test]
    fn test_divide_and_modulo() {
        assert_eq!(divide(json!(7), json!(2)).unwrap(), json!(3.5));
        assert!(divide(json!(1), json!(0)).is_err());
        assert_eq!(divide(json!("a,b"), json!(",")).unwrap(), json!(["a", "b"]));
        assert_eq!(modulo(&json!(7), &json!(3)).unwrap(), json!(1));
        assert_eq!(modulo(&json!(-7), &json!(3)).unwrap(), json!(-1));
        assert!(modulo(&json!(1), &json!(0)).is_err());
    }

    #[test]
    fn test_describe_elides_long_values() {
        let long = json!("abcdefghijklmnopqrstuvwxyz0123456789");
        assert!(describe(&long).ends_with("...)"));
    }
}
