//! Indexing, path expressions and path-based mutation.

use serde_json::{Map, Value};

use super::ast::{Expr, Param};
use super::interp::{Callable, Env, EvalError, EvalResult, Interp, Sink, suppress};
use super::value::{MAX_VALUE_DEPTH, as_f64, compare, deeper_than, describe, truthy, type_name};

/// A path into a value: object keys, array indices and slice objects.
pub type Path = Vec<Value>;

/// Receives `(path, value)` pairs one at a time.
pub type PathSink<'s> = dyn FnMut(Path, Value) -> EvalResult<()> + 's;

/// Arrays are never grown past this many slots by `setpath`.
const MAX_ARRAY_GROWTH: usize = 1 << 20;

fn key_description(key: &Value) -> String {
    match key {
        Value::String(s) => format!("{s:?}"),
        other => type_name(other).to_string(),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn array_index(len: usize, n: f64) -> Option<usize> {
    let index = n.floor() as i64;
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index.checked_add(len)? } else { index };
    usize::try_from(index).ok()
}

/// Resolve slice bounds against a length.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn slice_bounds(len: usize, from: &Value, to: &Value) -> EvalResult<(usize, usize)> {
    let bound = |v: &Value, default: f64, round_up: bool| -> EvalResult<usize> {
        let n = match v {
            Value::Null => default,
            Value::Number(_) => as_f64(v).unwrap_or(0.0),
            _ => {
                return Err(EvalError::msg(
                    "Start and end indices of an array slice must be numbers",
                ));
            }
        };
        let n = if round_up { n.ceil() } else { n.floor() };
        let len_f = len as f64;
        let n = if n < 0.0 { (n + len_f).max(0.0) } else { n.min(len_f) };
        Ok(n as usize)
    };
    let start = bound(from, 0.0, false)?;
    let end = bound(to, len as f64, true)?.max(start);
    Ok((start, end))
}

fn slice_key(key: &Map<String, Value>) -> (Value, Value) {
    (
        key.get("start").cloned().unwrap_or(Value::Null),
        key.get("end").cloned().unwrap_or(Value::Null),
    )
}

/// `value[from:to]`.
pub fn slice(value: &Value, from: &Value, to: &Value) -> EvalResult<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Array(items) => {
            let (start, end) = slice_bounds(items.len(), from, to)?;
            Ok(Value::Array(
                items.get(start..end).map(<[Value]>::to_vec).unwrap_or_default(),
            ))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(chars.len(), from, to)?;
            Ok(Value::String(
                chars.get(start..end).map(|c| c.iter().collect()).unwrap_or_default(),
            ))
        }
        other => Err(EvalError::msg(format!(
            "Cannot index {} with object",
            type_name(other)
        ))),
    }
}

/// `value[key]`.
pub fn index(value: &Value, key: &Value) -> EvalResult<Value> {
    match (value, key) {
        (Value::Null, Value::String(_) | Value::Number(_) | Value::Object(_) | Value::Null) => {
            Ok(Value::Null)
        }
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Array(items), Value::Number(_)) => Ok(as_f64(key)
            .and_then(|n| array_index(items.len(), n))
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null)),
        (Value::Array(_) | Value::String(_), Value::Object(bounds)) => {
            let (from, to) = slice_key(bounds);
            slice(value, &from, &to)
        }
        _ => Err(EvalError::msg(format!(
            "Cannot index {} with {}",
            type_name(value),
            key_description(key)
        ))),
    }
}

/// Emit every element (or object value) of `value`.
pub fn iterate(value: &Value, out: &mut Sink<'_>) -> EvalResult<()> {
    match value {
        Value::Array(items) => items.iter().try_for_each(|item| out(item.clone())),
        Value::Object(map) => map.values().try_for_each(|item| out(item.clone())),
        other => Err(EvalError::msg(format!(
            "Cannot iterate over {}",
            describe(other)
        ))),
    }
}

/// Every value in pre-order, the root first.
pub fn recurse_values(value: &Value, out: &mut Sink<'_>) -> EvalResult<()> {
    let mut pending = vec![value];
    while let Some(current) = pending.pop() {
        out(current.clone())?;
        match current {
            Value::Array(items) => pending.extend(items.iter().rev()),
            Value::Object(map) => pending.extend(map.values().rev()),
            _ => {}
        }
    }
    Ok(())
}

/// Every `(path, value)` pair in pre-order, the root first.
pub fn recurse_paths(path: &Path, value: &Value, out: &mut PathSink<'_>) -> EvalResult<()> {
    let mut pending = vec![(path.clone(), value)];
    while let Some((path, current)) = pending.pop() {
        out(path.clone(), current.clone())?;
        let child = |key: Value| {
            let mut next = path.clone();
            next.push(key);
            next
        };
        match current {
            Value::Array(items) => pending.extend(
                items
                    .iter()
                    .enumerate()
                    .rev()
                    .map(|(i, item)| (child(Value::from(i)), item)),
            ),
            Value::Object(map) => pending.extend(
                map.iter()
                    .rev()
                    .map(|(k, item)| (child(Value::String(k.clone())), item)),
            ),
            _ => {}
        }
    }
    Ok(())
}

pub fn getpath(value: &Value, path: &[Value]) -> EvalResult<Value> {
    let mut current = value.clone();
    for key in path {
        if current.is_null() {
            return Ok(Value::Null);
        }
        current = index(&current, key)?;
    }
    Ok(current)
}

/// Set the value at `path`, creating objects and arrays along the way.
pub fn setpath(root: Value, path: &[Value], new: Value) -> EvalResult<Value> {
    let room = MAX_VALUE_DEPTH.checked_sub(path.len());
    if room.is_none_or(|room| deeper_than(&new, room)) {
        return Err(EvalError::msg(format!(
            "value nested deeper than {MAX_VALUE_DEPTH} levels"
        )));
    }
    set_in(root, path, new)
}

fn set_in(root: Value, path: &[Value], new: Value) -> EvalResult<Value> {
    let Some((key, rest)) = path.split_first() else {
        return Ok(new);
    };
    match (root, key) {
        (Value::Null, Value::String(k)) => {
            let mut map = Map::new();
            map.insert(k.clone(), set_in(Value::Null, rest, new)?);
            Ok(Value::Object(map))
        }
        (Value::Object(mut map), Value::String(k)) => {
            let child = map.remove(k).unwrap_or(Value::Null);
            map.insert(k.clone(), set_in(child, rest, new)?);
            Ok(Value::Object(map))
        }
        (Value::Null, Value::Number(_)) => set_in(Value::Array(Vec::new()), path, new),
        (Value::Array(mut items), Value::Number(n)) => {
            let n = n.as_f64().unwrap_or(0.0);
            let index = array_index(items.len(), n)
                .ok_or_else(|| EvalError::msg("Out of bounds negative array index"))?;
            if index >= MAX_ARRAY_GROWTH {
                return Err(EvalError::msg("Array index too large"));
            }
            if index >= items.len() {
                items.resize(index.saturating_add(1), Value::Null);
            }
            if let Some(slot) = items.get_mut(index) {
                let child = std::mem::take(slot);
                *slot = set_in(child, rest, new)?;
            }
            Ok(Value::Array(items))
        }
        (root @ (Value::Null | Value::Array(_)), Value::Object(bounds)) => {
            let mut items = match root {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            let (from, to) = slice_key(bounds);
            let (start, end) = slice_bounds(items.len(), &from, &to)?;
            let current = Value::Array(items.get(start..end).map(<[Value]>::to_vec).unwrap_or_default());
            let Value::Array(replacement) = set_in(current, rest, new)? else {
                return Err(EvalError::msg(
                    "A slice of an array can only be assigned another array",
                ));
            };
            items.splice(start..end, replacement);
            Ok(Value::Array(items))
        }
        (root, key) => Err(EvalError::msg(format!(
            "Cannot index {} with {}",
            type_name(&root),
            key_description(key)
        ))),
    }
}

fn delpath(root: Value, path: &[Value]) -> EvalResult<Value> {
    let Some((key, rest)) = path.split_first() else {
        return Ok(Value::Null);
    };
    match (root, key) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Object(mut map), Value::String(k)) => {
            if rest.is_empty() {
                map.remove(k);
            } else if let Some(child) = map.remove(k) {
                map.insert(k.clone(), delpath(child, rest)?);
            }
            Ok(Value::Object(map))
        }
        (Value::Array(mut items), Value::Number(n)) => {
            let index = array_index(items.len(), n.as_f64().unwrap_or(0.0));
            match index.filter(|i| *i < items.len()) {
                Some(i) if rest.is_empty() => {
                    items.remove(i);
                }
                Some(i) => {
                    if let Some(slot) = items.get_mut(i) {
                        let child = std::mem::take(slot);
                        *slot = delpath(child, rest)?;
                    }
                }
                None => {}
            }
            Ok(Value::Array(items))
        }
        (Value::Array(mut items), Value::Object(bounds)) => {
            let (from, to) = slice_key(bounds);
            let (start, end) = slice_bounds(items.len(), &from, &to)?;
            if rest.is_empty() {
                items.drain(start..end);
            } else {
                let current = Value::Array(items.get(start..end).map(<[Value]>::to_vec).unwrap_or_default());
                if let Value::Array(replacement) = delpath(current, rest)? {
                    items.splice(start..end, replacement);
                }
            }
            Ok(Value::Array(items))
        }
        (root, key) => Err(EvalError::msg(format!(
            "Cannot delete field at {} of {}",
            key_description(key),
            type_name(&root)
        ))),
    }
}

/// Delete several paths; longer and later paths go first so indices stay valid.
pub fn delpaths(root: Value, mut paths: Vec<Value>) -> EvalResult<Value> {
    paths.sort_by(compare);
    let mut result = root;
    for path in paths.iter().rev() {
        let Value::Array(path) = path else {
            return Err(EvalError::msg("Path must be specified as an array"));
        };
        result = delpath(result, path)?;
    }
    Ok(result)
}

impl Interp {
    /// Evaluate `expr` as a path expression against `input`.
    pub(crate) fn paths<'q>(
        &self,
        expr: &'q Expr,
        input: &Value,
        env: &Env<'q>,
    ) -> EvalResult<Vec<(Path, Value)>> {
        let mut found = Vec::new();
        self.eval_paths(expr, &Vec::new(), input, env, &mut |path, value| {
            found.push((path, value));
            Ok(())
        })?;
        Ok(found)
    }

    /// Emit the `(path, value)` pairs `expr` selects below `path`, where
    /// `value` is what `path` currently holds.
    #[allow(clippy::too_many_lines)]
    pub(crate) fn eval_paths<'q>(
        &self,
        expr: &'q Expr,
        path: &Path,
        value: &Value,
        env: &Env<'q>,
        out: &mut PathSink<'_>,
    ) -> EvalResult<()> {
        let _guard = self.enter()?;
        match expr {
            Expr::Identity => out(path.clone(), value.clone()),
            Expr::RecurseAll => recurse_paths(path, value, out),
            Expr::Pipe(lhs, rhs) => self.eval_paths(lhs, path, value, env, &mut |p, v| {
                self.eval_paths(rhs, &p, &v, env, out)
            }),
            Expr::Comma(items) => {
                for item in items {
                    self.eval_paths(item, path, value, env, out)?;
                }
                Ok(())
            }
            Expr::Index(target, key) => self.eval_paths(target, path, value, env, &mut |p, v| {
                self.eval(key, value, env, &mut |key| {
                    let child = if v.is_null() { Value::Null } else { index(&v, &key)? };
                    let mut next = p.clone();
                    next.push(key);
                    out(next, child)
                })
            }),
            Expr::Slice(target, from, to) => {
                let froms = self.optional_values(from.as_deref(), value, env)?;
                let tos = self.optional_values(to.as_deref(), value, env)?;
                self.eval_paths(target, path, value, env, &mut |p, v| {
                    for from in &froms {
                        for to in &tos {
                            let child = slice(&v, from, to)?;
                            let mut bounds = Map::new();
                            bounds.insert("start".into(), from.clone());
                            bounds.insert("end".into(), to.clone());
                            let mut next = p.clone();
                            next.push(Value::Object(bounds));
                            out(next, child)?;
                        }
                    }
                    Ok(())
                })
            }
            Expr::Iterate(target) => self.eval_paths(target, path, value, env, &mut |p, v| {
                let child = |key: Value| {
                    let mut next = p.clone();
                    next.push(key);
                    next
                };
                match v {
                    Value::Array(items) => {
                        for (i, item) in items.into_iter().enumerate() {
                            out(child(Value::from(i)), item)?;
                        }
                        Ok(())
                    }
                    Value::Object(map) => {
                        for (k, item) in map {
                            out(child(Value::String(k)), item)?;
                        }
                        Ok(())
                    }
                    Value::Null => Ok(()),
                    other => Err(EvalError::msg(format!(
                        "Cannot iterate over {}",
                        describe(&other)
                    ))),
                }
            }),
            Expr::Optional(inner) | Expr::Try { body: inner, catch: None } => {
                suppress(self.paths_guarded(inner, path, value, env, out)?)
            }
            Expr::If {
                branches,
                otherwise,
            } => self.paths_if(branches, otherwise.as_deref(), path, value, env, out),
            Expr::Alt(lhs, rhs) => {
                let mut any = false;
                let own = self.paths_guarded(lhs, path, value, env, &mut |p, v| {
                    if truthy(&v) {
                        any = true;
                        out(p, v)
                    } else {
                        Ok(())
                    }
                })?;
                suppress(own)?;
                if any {
                    Ok(())
                } else {
                    self.eval_paths(rhs, path, value, env, out)
                }
            }
            Expr::Bind {
                source,
                pattern,
                body,
            } => self.eval(source, value, env, &mut |bound| {
                for scoped in self.destructure(pattern, &bound, value, env)? {
                    self.eval_paths(body, path, value, &scoped, out)?;
                }
                Ok(())
            }),
            Expr::Def {
                name,
                params,
                body,
                rest,
            } => {
                let callable = Callable::Def {
                    params,
                    body,
                    env: env.clone(),
                };
                self.eval_paths(rest, path, value, &env.define(name, params.len(), callable), out)
            }
            Expr::Label { name, body } => {
                let id = self.label();
                let scoped = env.with_label(name, id);
                Self::landed(id, self.eval_paths(body, path, value, &scoped, out))
            }
            Expr::Call(name, args) => self.call_paths(name, args, path, value, env, out),
            other => self.not_a_path(other, value, env),
        }
    }

    /// Fails on the first value `expr` produces, since values have no path.
    fn not_a_path<'q>(&self, expr: &'q Expr, value: &Value, env: &Env<'q>) -> EvalResult<()> {
        self.eval(expr, value, env, &mut |produced| {
            Err(EvalError::msg(format!(
                "Invalid path expression with result {}",
                describe(&produced)
            )))
        })
    }

    /// Path-mode counterpart of `eval_guarded`.
    fn paths_guarded<'q>(
        &self,
        expr: &'q Expr,
        path: &Path,
        value: &Value,
        env: &Env<'q>,
        out: &mut PathSink<'_>,
    ) -> EvalResult<EvalResult<()>> {
        let id = self.label();
        let mut downstream = None;
        let result = self.eval_paths(expr, path, value, env, &mut |p, v| {
            out(p, v).map_err(|error| {
                downstream = Some(error);
                EvalError::Break(id)
            })
        });
        match downstream {
            Some(error) => Err(error),
            None => Ok(result),
        }
    }

    fn paths_if<'q>(
        &self,
        branches: &'q [(Expr, Expr)],
        otherwise: Option<&'q Expr>,
        path: &Path,
        value: &Value,
        env: &Env<'q>,
        out: &mut PathSink<'_>,
    ) -> EvalResult<()> {
        let Some(((cond, then), rest)) = branches.split_first() else {
            return match otherwise {
                Some(expr) => self.eval_paths(expr, path, value, env, out),
                None => out(path.clone(), value.clone()),
            };
        };
        let _guard = self.enter()?;
        self.eval(cond, value, env, &mut |c| {
            if truthy(&c) {
                self.eval_paths(then, path, value, env, out)
            } else {
                self.paths_if(rest, otherwise, path, value, env, out)
            }
        })
    }

    #[allow(clippy::too_many_lines)]
    fn call_paths<'q>(
        &self,
        name: &str,
        args: &'q [Expr],
        path: &Path,
        value: &Value,
        env: &Env<'q>,
        out: &mut PathSink<'_>,
    ) -> EvalResult<()> {
        match env.function(name, args.len()) {
            Some(Callable::Def {
                params,
                body,
                env: defined,
            }) => {
                let (params, body) = (*params, *body);
                let callable = Callable::Def {
                    params,
                    body,
                    env: defined.clone(),
                };
                let scope = defined.define(name, params.len(), callable);
                return self.bind_path_params(params, args, body, scope, path, value, env, out);
            }
            Some(Callable::Closure { body, env: captured }) => {
                return self.eval_paths(*body, path, value, captured, out);
            }
            Some(Callable::Value(produced)) => {
                return Err(EvalError::msg(format!(
                    "Invalid path expression with result {}",
                    describe(produced)
                )));
            }
            None => {}
        }
        match (name, args) {
            ("empty", []) => Ok(()),
            ("error", _) => self.call(name, args, value, env, &mut |_| Ok(())),
            ("select", [cond]) => self.eval(cond, value, env, &mut |c| {
                if truthy(&c) {
                    out(path.clone(), value.clone())
                } else {
                    Ok(())
                }
            }),
            ("recurse", []) => recurse_paths(path, value, out),
            ("recurse" | "repeat", [step]) => self.recurse_paths_with(step, path, value, env, out),
            ("getpath", [target]) => self.eval(target, value, env, &mut |p| {
                let Value::Array(keys) = p else {
                    return Err(EvalError::msg("Path must be specified as an array"));
                };
                let child = getpath(value, &keys)?;
                let mut next = path.clone();
                next.extend(keys);
                out(next, child)
            }),
            ("first" | "last", []) => {
                let key = Value::from(if name == "first" { 0 } else { -1 });
                let child = index(value, &key)?;
                let mut next = path.clone();
                next.push(key);
                out(next, child)
            }
            ("first", [inner]) => {
                let id = self.label();
                let result = self.eval_paths(inner, path, value, env, &mut |p, v| {
                    out(p, v)?;
                    Err(EvalError::Break(id))
                });
                Self::landed(id, result)
            }
            ("last", [inner]) => {
                let mut last = None;
                self.eval_paths(inner, path, value, env, &mut |p, v| {
                    last = Some((p, v));
                    Ok(())
                })?;
                match last {
                    Some((p, v)) => out(p, v),
                    None => Ok(()),
                }
            }
            ("limit", [count, inner]) => self.eval(count, value, env, &mut |n| {
                let keep = match limit_count(&n)? {
                    None => return self.eval_paths(inner, path, value, env, out),
                    Some(0) => return Ok(()),
                    Some(keep) => keep,
                };
                let id = self.label();
                let mut taken = 0_usize;
                let result = self.eval_paths(inner, path, value, env, &mut |p, v| {
                    taken = taken.saturating_add(1);
                    out(p, v)?;
                    if taken >= keep {
                        return Err(EvalError::Break(id));
                    }
                    Ok(())
                });
                Self::landed(id, result)
            }),
            _ => self.call(name, args, value, env, &mut |produced| {
                Err(EvalError::msg(format!(
                    "Invalid path expression with result {}",
                    describe(&produced)
                )))
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn bind_path_params<'q>(
        &self,
        params: &'q [Param],
        args: &'q [Expr],
        body: &'q Expr,
        scope: Env<'q>,
        path: &Path,
        value: &Value,
        caller: &Env<'q>,
        out: &mut PathSink<'_>,
    ) -> EvalResult<()> {
        let (Some((param, params)), Some((arg, args))) = (params.split_first(), args.split_first())
        else {
            return self.eval_paths(body, path, value, &scope, out);
        };
        match param {
            Param::Filter(name) => {
                let closure = Callable::Closure {
                    body: arg,
                    env: caller.clone(),
                };
                let scope = scope.define(name, 0, closure);
                self.bind_path_params(params, args, body, scope, path, value, caller, out)
            }
            Param::Value(name) => self.eval(arg, value, caller, &mut |bound| {
                let scope = scope
                    .bind(name, bound.clone())
                    .define(name, 0, Callable::Value(bound));
                self.bind_path_params(params, args, body, scope, path, value, caller, out)
            }),
        }
    }

    /// Paths of `recurse(step)`: each selected path, then what `step` selects below it.
    fn recurse_paths_with<'q>(
        &self,
        step: &'q Expr,
        path: &Path,
        value: &Value,
        env: &Env<'q>,
        out: &mut PathSink<'_>,
    ) -> EvalResult<()> {
        let mut pending = vec![(path.clone(), value.clone())];
        while let Some((p, v)) = pending.pop() {
            self.tick()?;
            out(p.clone(), v.clone())?;
            let mut children = Vec::new();
            self.eval_paths(step, &p, &v, env, &mut |cp, cv| {
                children.push((cp, cv));
                Ok(())
            })?;
            pending.extend(children.into_iter().rev());
        }
        Ok(())
    }
}

/// Number of items `limit(n; f)` keeps; `None` for a negative count, which keeps all.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn limit_count(n: &Value) -> EvalResult<Option<usize>> {
    let n = as_f64(n).ok_or_else(|| {
        EvalError::msg(format!("Invalid limit {}: must be a number", describe(n)))
    })?;
    Ok((n >= 0.0).then(|| n.ceil() as usize))
}
