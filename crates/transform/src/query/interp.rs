//! Evaluator.
//!
//! Outputs stream into a sink callback as they are produced, so a consumer
//! sees every value emitted before a later error and can stop a generator
//! early. Stopping early and `break` both unwind with [`EvalError::Break`]
//! carrying a label id that only the matching frame absorbs.

use std::cell::Cell;
use std::time::Instant;

use serde_json::{Map, Value};

use super::ast::{AssignOp, Expr, ObjKey, Param, Pattern, StrPart};
use super::format;
use super::path::{Path, delpaths, getpath, index, iterate, recurse_values, setpath, slice};
use super::value::{
    MAX_VALUE_DEPTH, as_f64, binary, deeper_than, describe, number, to_text, truthy,
};

/// Nesting limit for evaluation.
pub const MAX_DEPTH: usize = 128;

/// Evaluation failure.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// An error value raised by the query; catchable by `try` and `?`.
    Raised(Value),
    /// The deadline passed.
    Timeout,
    /// Evaluation nested deeper than [`MAX_DEPTH`].
    TooDeep,
    /// Unwinding to the label with this id.
    Break(u64),
}

pub type EvalResult<T> = Result<T, EvalError>;

/// Receives outputs one at a time.
pub type Sink<'s> = dyn FnMut(Value) -> EvalResult<()> + 's;

impl EvalError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Raised(Value::String(message.into()))
    }

    pub fn message(&self) -> String {
        match self {
            Self::Raised(Value::String(s)) => s.clone(),
            Self::Raised(other) => format!("{other} (not a string)"),
            Self::Timeout => "evaluation timed out".to_string(),
            Self::TooDeep => format!("evaluation nested deeper than {MAX_DEPTH} levels"),
            Self::Break(_) => "break without a matching label".to_string(),
        }
    }
}

/// What a function name resolves to.
#[derive(Debug, Clone)]
pub enum Callable<'q> {
    /// A `def`, closed over the scope it was defined in.
    Def {
        params: &'q [Param],
        body: &'q Expr,
        env: Env<'q>,
    },
    /// A filter argument, evaluated in the caller's scope.
    Closure { body: &'q Expr, env: Env<'q> },
    /// A `$param` also callable as `param`.
    Value(Value),
}

/// Variables, functions and labels in scope.
#[derive(Debug, Clone, Default)]
pub struct Env<'q> {
    vars: im::HashMap<String, Value>,
    funcs: im::HashMap<String, Callable<'q>>,
    labels: im::HashMap<String, u64>,
}

impl<'q> Env<'q> {
    pub fn bind(&self, name: &str, value: Value) -> Self {
        let mut next = self.clone();
        next.vars.insert(name.to_string(), value);
        next
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn define(&self, name: &str, arity: usize, callable: Callable<'q>) -> Self {
        let mut next = self.clone();
        next.funcs.insert(format!("{name}/{arity}"), callable);
        next
    }

    pub fn function(&self, name: &str, arity: usize) -> Option<&Callable<'q>> {
        self.funcs.get(&format!("{name}/{arity}"))
    }

    pub(crate) fn with_label(&self, name: &str, id: u64) -> Self {
        let mut next = self.clone();
        next.labels.insert(name.to_string(), id);
        next
    }

    pub(crate) fn label(&self, name: &str) -> Option<u64> {
        self.labels.get(name).copied()
    }
}

/// Releases one level of evaluation depth when dropped.
pub(crate) struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

pub struct Interp {
    deadline: Option<Instant>,
    depth: Cell<usize>,
    labels: Cell<u64>,
}

impl Interp {
    pub const fn new(deadline: Option<Instant>) -> Self {
        Self {
            deadline,
            depth: Cell::new(0),
            labels: Cell::new(0),
        }
    }

    /// Evaluate `expr` against `input`, passing each output to `out`.
    pub fn run(&self, expr: &Expr, input: &Value, out: &mut Sink<'_>) -> EvalResult<()> {
        self.eval(expr, input, &Env::default(), out)
    }

    /// Check the deadline and take one level of depth.
    pub(crate) fn enter(&self) -> EvalResult<DepthGuard<'_>> {
        self.tick()?;
        let depth = self.depth.get();
        if depth >= MAX_DEPTH {
            return Err(EvalError::TooDeep);
        }
        self.depth.set(depth.saturating_add(1));
        Ok(DepthGuard(&self.depth))
    }

    /// Deadline check for loops that do not nest.
    pub(crate) fn tick(&self) -> EvalResult<()> {
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(EvalError::Timeout);
        }
        Ok(())
    }

    /// A fresh label id.
    pub(crate) fn label(&self) -> u64 {
        let id = self.labels.get().wrapping_add(1);
        self.labels.set(id);
        id
    }

    /// Absorb a break aimed at `id`.
    pub(crate) fn landed(id: u64, result: EvalResult<()>) -> EvalResult<()> {
        match result {
            Err(EvalError::Break(target)) if target == id => Ok(()),
            other => other,
        }
    }

    /// Reject values nested too deeply to handle safely.
    pub(crate) fn bounded(value: Value) -> EvalResult<Value> {
        if deeper_than(&value, MAX_VALUE_DEPTH) {
            return Err(EvalError::msg(format!(
                "value nested deeper than {MAX_VALUE_DEPTH} levels"
            )));
        }
        Ok(value)
    }

    pub(crate) fn values<'q>(
        &self,
        expr: &'q Expr,
        input: &Value,
        env: &Env<'q>,
    ) -> EvalResult<Vec<Value>> {
        let mut values = Vec::new();
        self.eval(expr, input, env, &mut |value| {
            values.push(value);
            Ok(())
        })?;
        Ok(values)
    }

    /// The first output of `expr`, without evaluating the rest.
    pub(crate) fn first_output<'q>(
        &self,
        expr: &'q Expr,
        input: &Value,
        env: &Env<'q>,
    ) -> EvalResult<Option<Value>> {
        let id = self.label();
        let mut found = None;
        let result = self.eval(expr, input, env, &mut |value| {
            found = Some(value);
            Err(EvalError::Break(id))
        });
        Self::landed(id, result)?;
        Ok(found)
    }

    /// Whether some output of `expr` has truthiness `wanted`. Stops at the first one.
    pub(crate) fn some_output<'q>(
        &self,
        expr: &'q Expr,
        input: &Value,
        env: &Env<'q>,
        wanted: bool,
    ) -> EvalResult<bool> {
        let id = self.label();
        let mut found = false;
        let result = self.eval(expr, input, env, &mut |value| {
            if truthy(&value) == wanted {
                found = true;
                return Err(EvalError::Break(id));
            }
            Ok(())
        });
        Self::landed(id, result)?;
        Ok(found)
    }

    /// Evaluate `expr`, keeping its own failure apart from failures of `out`.
    ///
    /// The outer error is whatever `out` returned; the inner result is what
    /// `expr` itself did. `try`, `?` and `//` only look at the inner one.
    pub(crate) fn eval_guarded<'q>(
        &self,
        expr: &'q Expr,
        input: &Value,
        env: &Env<'q>,
        out: &mut Sink<'_>,
    ) -> EvalResult<EvalResult<()>> {
        let id = self.label();
        let mut downstream = None;
        let result = self.eval(expr, input, env, &mut |value| {
            out(value).map_err(|error| {
                downstream = Some(error);
                EvalError::Break(id)
            })
        });
        match downstream {
            Some(error) => Err(error),
            None => Ok(result),
        }
    }

    pub(crate) fn eval<'q>(
        &self,
        expr: &'q Expr,
        input: &Value,
        env: &Env<'q>,
        out: &mut Sink<'_>,
    ) -> EvalResult<()> {
        match expr {
            Expr::Identity => return out(input.clone()),
            Expr::Literal(value) => return out(value.clone()),
            Expr::Var(name) => return out(Self::variable(name, env)?),
            _ => {}
        }
        let _guard = self.enter()?;
        match expr {
            Expr::Identity | Expr::Literal(_) | Expr::Var(_) => Ok(()),
            Expr::RecurseAll => recurse_values(input, out),
            Expr::Str { format, parts } => {
                for rendered in self.interpolate(format.as_deref(), parts, input, env)? {
                    out(Value::String(rendered))?;
                }
                Ok(())
            }
            Expr::Format(name) => out(format::apply(name, input)?),
            Expr::Array(None) => out(Value::Array(Vec::new())),
            Expr::Array(Some(inner)) => {
                let items = self.values(inner, input, env)?;
                out(Self::bounded(Value::Array(items))?)
            }
            Expr::Object(entries) => self.object(entries, input, env, out),
            Expr::Neg(inner) => self.eval(inner, input, env, &mut |value| out(negate(&value)?)),
            Expr::Pipe(lhs, rhs) => {
                self.eval(lhs, input, env, &mut |value| self.eval(rhs, &value, env, out))
            }
            Expr::Comma(items) => {
                for item in items {
                    self.eval(item, input, env, out)?;
                }
                Ok(())
            }
            Expr::Binary(op, lhs, rhs) => {
                let op = *op;
                let mut lefts: Option<Vec<Value>> = None;
                self.eval(rhs, input, env, &mut |r| {
                    if let Some(cached) = &lefts {
                        for l in cached {
                            out(binary(op, l.clone(), r.clone()).map_err(EvalError::msg)?)?;
                        }
                        return Ok(());
                    }
                    let mut seen = Vec::new();
                    self.eval(lhs, input, env, &mut |l| {
                        seen.push(l.clone());
                        out(binary(op, l, r.clone()).map_err(EvalError::msg)?)
                    })?;
                    lefts = Some(seen);
                    Ok(())
                })
            }
            Expr::And(lhs, rhs) => self.eval(lhs, input, env, &mut |l| {
                if truthy(&l) {
                    self.eval(rhs, input, env, &mut |r| out(Value::Bool(truthy(&r))))
                } else {
                    out(Value::Bool(false))
                }
            }),
            Expr::Or(lhs, rhs) => self.eval(lhs, input, env, &mut |l| {
                if truthy(&l) {
                    out(Value::Bool(true))
                } else {
                    self.eval(rhs, input, env, &mut |r| out(Value::Bool(truthy(&r))))
                }
            }),
            Expr::Alt(lhs, rhs) => {
                let mut any = false;
                let own = self.eval_guarded(lhs, input, env, &mut |value| {
                    if truthy(&value) {
                        any = true;
                        out(value)
                    } else {
                        Ok(())
                    }
                })?;
                suppress(own)?;
                if any {
                    Ok(())
                } else {
                    self.eval(rhs, input, env, out)
                }
            }
            Expr::Assign(op, lhs, rhs) => self.assign(*op, lhs, rhs, input, env, out),
            Expr::If {
                branches,
                otherwise,
            } => self.eval_if(branches, otherwise.as_deref(), input, env, out),
            Expr::Try { body, catch } => match self.eval_guarded(body, input, env, out)? {
                Err(EvalError::Raised(error)) => match catch {
                    Some(handler) => self.eval(handler, &error, env, out),
                    None => Ok(()),
                },
                other => other,
            },
            Expr::Optional(inner) => suppress(self.eval_guarded(inner, input, env, out)?),
            Expr::Reduce {
                source,
                pattern,
                init,
                update,
            } => self.eval(init, input, env, &mut |mut state| {
                self.eval(source, input, env, &mut |item| {
                    for scoped in self.destructure(pattern, &item, input, env)? {
                        let mut last = None;
                        self.eval(update, &state, &scoped, &mut |next| {
                            last = Some(next);
                            Ok(())
                        })?;
                        state = last.unwrap_or(Value::Null);
                    }
                    Ok(())
                })?;
                out(state)
            }),
            Expr::Foreach {
                source,
                pattern,
                init,
                update,
                extract,
            } => self.eval(init, input, env, &mut |mut state| {
                self.eval(source, input, env, &mut |item| {
                    for scoped in self.destructure(pattern, &item, input, env)? {
                        let mut emitted = Vec::new();
                        self.eval(update, &state, &scoped, &mut |next| {
                            emitted.push(next);
                            Ok(())
                        })?;
                        for next in emitted {
                            match extract {
                                Some(extract) => self.eval(extract, &next, &scoped, out)?,
                                None => out(next.clone())?,
                            }
                            state = next;
                        }
                    }
                    Ok(())
                })
            }),
            Expr::Bind {
                source,
                pattern,
                body,
            } => self.eval(source, input, env, &mut |value| {
                for scoped in self.destructure(pattern, &value, input, env)? {
                    self.eval(body, input, &scoped, out)?;
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
                self.eval(rest, input, &env.define(name, params.len(), callable), out)
            }
            Expr::Label { name, body } => {
                let id = self.label();
                Self::landed(id, self.eval(body, input, &env.with_label(name, id), out))
            }
            Expr::Break(name) => match env.label(name) {
                Some(id) => Err(EvalError::Break(id)),
                None => Err(EvalError::msg(format!("$*label-{name} is not defined"))),
            },
            Expr::Call(name, args) => self.call_function(name, args, input, env, out),
            Expr::Index(target, key) => {
                if let Expr::Literal(key) = key.as_ref() {
                    return self.eval(target, input, env, &mut |value| out(index(&value, key)?));
                }
                self.eval(target, input, env, &mut |value| {
                    self.eval(key, input, env, &mut |key| out(index(&value, &key)?))
                })
            }
            Expr::Slice(target, from, to) => self.eval(target, input, env, &mut |value| {
                let froms = self.optional_values(from.as_deref(), input, env)?;
                let tos = self.optional_values(to.as_deref(), input, env)?;
                for from in &froms {
                    for to in &tos {
                        out(slice(&value, from, to)?)?;
                    }
                }
                Ok(())
            }),
            Expr::Iterate(target) => {
                self.eval(target, input, env, &mut |value| iterate(&value, out))
            }
        }
    }

    fn variable(name: &str, env: &Env<'_>) -> EvalResult<Value> {
        match env.get(name) {
            Some(value) => Ok(value.clone()),
            None if name == "ENV" => Ok(Value::Object(Map::new())),
            None => Err(EvalError::msg(format!("${name} is not defined"))),
        }
    }

    fn eval_if<'q>(
        &self,
        branches: &'q [(Expr, Expr)],
        otherwise: Option<&'q Expr>,
        input: &Value,
        env: &Env<'q>,
        out: &mut Sink<'_>,
    ) -> EvalResult<()> {
        let Some(((cond, then), rest)) = branches.split_first() else {
            return match otherwise {
                Some(expr) => self.eval(expr, input, env, out),
                None => out(input.clone()),
            };
        };
        let _guard = self.enter()?;
        self.eval(cond, input, env, &mut |c| {
            if truthy(&c) {
                self.eval(then, input, env, out)
            } else {
                self.eval_if(rest, otherwise, input, env, out)
            }
        })
    }

    /// Resolve a call against user definitions first, then the builtins.
    fn call_function<'q>(
        &self,
        name: &str,
        args: &'q [Expr],
        input: &Value,
        env: &Env<'q>,
        out: &mut Sink<'_>,
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
                self.bind_params(params, args, body, scope, input, env, out)
            }
            Some(Callable::Closure { body, env: captured }) => self.eval(*body, input, captured, out),
            Some(Callable::Value(value)) => out(value.clone()),
            None => self.call(name, args, input, env, out),
        }
    }

    /// Bind arguments to parameters, then evaluate `body`. A `$param`
    /// runs the body once per output of its argument, the first parameter
    /// varying slowest.
    #[allow(clippy::too_many_arguments)]
    fn bind_params<'q>(
        &self,
        params: &'q [Param],
        args: &'q [Expr],
        body: &'q Expr,
        scope: Env<'q>,
        input: &Value,
        caller: &Env<'q>,
        out: &mut Sink<'_>,
    ) -> EvalResult<()> {
        let (Some((param, params)), Some((arg, args))) = (params.split_first(), args.split_first())
        else {
            return self.eval(body, input, &scope, out);
        };
        match param {
            Param::Filter(name) => {
                let closure = Callable::Closure {
                    body: arg,
                    env: caller.clone(),
                };
                let scope = scope.define(name, 0, closure);
                self.bind_params(params, args, body, scope, input, caller, out)
            }
            Param::Value(name) => self.eval(arg, input, caller, &mut |value| {
                let scope = scope
                    .bind(name, value.clone())
                    .define(name, 0, Callable::Value(value));
                self.bind_params(params, args, body, scope, input, caller, out)
            }),
        }
    }

    /// Every environment `pattern` produces when matched against `value`.
    /// Key expressions run against `input`.
    pub(crate) fn destructure<'q>(
        &self,
        pattern: &'q Pattern,
        value: &Value,
        input: &Value,
        env: &Env<'q>,
    ) -> EvalResult<Vec<Env<'q>>> {
        match pattern {
            Pattern::Var(name) => Ok(vec![env.bind(name, value.clone())]),
            Pattern::Array(items) => {
                let mut envs = vec![env.clone()];
                for (i, item) in items.iter().enumerate() {
                    let element = index(value, &Value::from(i))?;
                    let mut next = Vec::new();
                    for scope in &envs {
                        next.extend(self.destructure(item, &element, input, scope)?);
                    }
                    envs = next;
                }
                Ok(envs)
            }
            Pattern::Object(entries) => {
                let mut envs = vec![env.clone()];
                for (key, sub) in entries {
                    let mut next = Vec::new();
                    for scope in &envs {
                        for key_value in self.object_keys(key, input, scope)? {
                            let field = index(value, &Value::String(key_value))?;
                            let bound = match key {
                                ObjKey::Var(name) => scope.bind(name, field.clone()),
                                _ => scope.clone(),
                            };
                            match sub {
                                Some(sub) => {
                                    next.extend(self.destructure(sub, &field, input, &bound)?);
                                }
                                None => next.push(bound),
                            }
                        }
                    }
                    envs = next;
                }
                Ok(envs)
            }
        }
    }

    /// Render a string template. Several outputs from one interpolation
    /// multiply the results, the first interpolation varying fastest.
    pub(crate) fn interpolate<'q>(
        &self,
        format: Option<&str>,
        parts: &'q [StrPart],
        input: &Value,
        env: &Env<'q>,
    ) -> EvalResult<Vec<String>> {
        let mut results = vec![String::new()];
        for part in parts {
            match part {
                StrPart::Lit(text) => results.iter_mut().for_each(|r| r.push_str(text)),
                StrPart::Interp(expr) => {
                    let rendered = self
                        .values(expr, input, env)?
                        .iter()
                        .map(|value| match format {
                            Some(name) => format::apply(name, value).map(|v| to_text(&v)),
                            None => Ok(to_text(value)),
                        })
                        .collect::<EvalResult<Vec<_>>>()?;
                    let mut next = Vec::with_capacity(results.len().saturating_mul(rendered.len()));
                    for text in &rendered {
                        self.tick()?;
                        next.extend(results.iter().map(|prefix| format!("{prefix}{text}")));
                    }
                    results = next;
                }
            }
        }
        Ok(results)
    }

    fn object_keys<'q>(&self, key: &'q ObjKey, input: &Value, env: &Env<'q>) -> EvalResult<Vec<String>> {
        match key {
            ObjKey::Str(parts) => self.interpolate(None, parts, input, env),
            ObjKey::Var(name) => Ok(vec![name.clone()]),
            ObjKey::Expr(expr) => self
                .values(expr, input, env)?
                .into_iter()
                .map(|k| match k {
                    Value::String(s) => Ok(s),
                    other => Err(EvalError::msg(format!(
                        "Object keys must be strings, got {}",
                        describe(&other)
                    ))),
                })
                .collect(),
        }
    }

    /// Build objects from every combination of entry outputs, the first
    /// entry varying slowest.
    fn object<'q>(
        &self,
        entries: &'q [(ObjKey, Expr)],
        input: &Value,
        env: &Env<'q>,
        out: &mut Sink<'_>,
    ) -> EvalResult<()> {
        let mut columns: Vec<Vec<(String, Value)>> = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let keys = self.object_keys(key, input, env)?;
            let values = self.values(value, input, env)?;
            let column: Vec<(String, Value)> = keys
                .iter()
                .flat_map(|k| values.iter().map(move |v| (k.clone(), v.clone())))
                .collect();
            if column.is_empty() {
                return Ok(());
            }
            columns.push(column);
        }
        let mut positions = vec![0_usize; columns.len()];
        loop {
            self.tick()?;
            let map: Map<String, Value> = columns
                .iter()
                .zip(&positions)
                .filter_map(|(column, &at)| column.get(at).cloned())
                .collect();
            out(Self::bounded(Value::Object(map))?)?;
            if !advance(&mut positions, &columns) {
                return Ok(());
            }
        }
    }

    fn assign<'q>(
        &self,
        op: AssignOp,
        lhs: &'q Expr,
        rhs: &'q Expr,
        input: &Value,
        env: &Env<'q>,
        out: &mut Sink<'_>,
    ) -> EvalResult<()> {
        match op {
            AssignOp::Update => {
                let updated =
                    self.update_paths(lhs, input, env, |current| self.first_output(rhs, current, env))?;
                out(updated)
            }
            AssignOp::Set => {
                let paths = self.paths(lhs, input, env)?;
                self.eval(rhs, input, env, &mut |value| {
                    let mut result = input.clone();
                    for (path, _) in &paths {
                        result = setpath(result, path, value.clone())?;
                    }
                    out(result)
                })
            }
            AssignOp::Arith(bin) => self.eval(rhs, input, env, &mut |operand| {
                let updated = self.update_paths(lhs, input, env, |current| {
                    binary(bin, current.clone(), operand.clone())
                        .map(Some)
                        .map_err(EvalError::msg)
                })?;
                out(updated)
            }),
            AssignOp::Alt => self.eval(rhs, input, env, &mut |fallback| {
                let updated = self.update_paths(lhs, input, env, |current| {
                    Ok(Some(if truthy(current) {
                        current.clone()
                    } else {
                        fallback.clone()
                    }))
                })?;
                out(updated)
            }),
        }
    }

    /// Rewrite every path `lhs` selects; `None` from `update` deletes the path.
    pub(crate) fn update_paths<'q, F>(
        &self,
        lhs: &'q Expr,
        input: &Value,
        env: &Env<'q>,
        update: F,
    ) -> EvalResult<Value>
    where
        F: FnMut(&Value) -> EvalResult<Option<Value>>,
    {
        let paths = self.paths(lhs, input, env)?.into_iter().map(|(path, _)| path);
        update_each(input.clone(), paths, update)
    }

    pub(crate) fn optional_values<'q>(
        &self,
        expr: Option<&'q Expr>,
        input: &Value,
        env: &Env<'q>,
    ) -> EvalResult<Vec<Value>> {
        match expr {
            Some(expr) => self.values(expr, input, env),
            None => Ok(vec![Value::Null]),
        }
    }
}

/// Keep going after an error raised by the query itself.
pub(crate) fn suppress(result: EvalResult<()>) -> EvalResult<()> {
    match result {
        Ok(()) | Err(EvalError::Raised(_)) => Ok(()),
        Err(other) => Err(other),
    }
}

/// Apply `update` to each path of `root` in turn.
pub(crate) fn update_each<F>(
    root: Value,
    paths: impl IntoIterator<Item = Path>,
    mut update: F,
) -> EvalResult<Value>
where
    F: FnMut(&Value) -> EvalResult<Option<Value>>,
{
    let mut result = root;
    let mut deletions: Vec<Value> = Vec::new();
    for path in paths {
        let current = getpath(&result, &path)?;
        match update(&current)? {
            Some(value) => result = setpath(result, &path, value)?,
            None => deletions.push(Value::Array(path)),
        }
    }
    if deletions.is_empty() {
        Ok(result)
    } else {
        delpaths(result, deletions)
    }
}

/// Step `positions` to the next combination, the last column fastest.
/// Returns false once every combination was visited.
fn advance<T>(positions: &mut [usize], columns: &[Vec<T>]) -> bool {
    for (at, column) in positions.iter_mut().zip(columns).rev() {
        *at = at.saturating_add(1);
        if *at < column.len() {
            return true;
        }
        *at = 0;
    }
    false
}

fn negate(value: &Value) -> EvalResult<Value> {
    if let Some(n) = value.as_i64().and_then(i64::checked_neg) {
        return Ok(Value::from(n));
    }
    as_f64(value)
        .map(|n| number(-n))
        .ok_or_else(|| EvalError::msg(format!("{} cannot be negated", describe(value))))
}
