//! A jq-compatible query dialect over `serde_json` values.
//!
//! Queries compile once into an expression tree. Evaluation streams each
//! output to a sink as soon as it exists, so a caller that wants only the
//! first output stops the query there. A deadline and nesting limits are
//! checked as evaluation descends, so a runaway query fails with a timeout
//! or depth error instead of hanging.

mod ast;
mod builtins;
mod format;
mod interp;
mod lexer;
mod parser;
mod path;
mod value;

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::{Result, TransformError};
use ast::Expr;
use interp::{EvalError, Interp};

/// A compiled query.
#[derive(Debug, Clone)]
pub struct Query {
    source: String,
    expr: Expr,
}

impl Query {
    /// Compile query text.
    pub fn compile(source: &str) -> Result<Self> {
        let expr = parser::parse(source).map_err(|reason| TransformError::parse(source, reason))?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every output, failing on the first error.
    pub fn run_all(&self, input: &Value, timeout: Option<Duration>) -> Result<Vec<Value>> {
        let mut outputs = Vec::new();
        self.interp(timeout)
            .run(&self.expr, input, &mut |value| {
                outputs.push(value);
                Ok(())
            })
            .map_err(|e| self.map_error(&e, timeout))?;
        Ok(outputs)
    }

    /// The first output. Evaluation stops once it is produced, so later
    /// outputs and errors are never reached.
    pub fn first(&self, input: &Value, timeout: Option<Duration>) -> Result<Value> {
        let interp = self.interp(timeout);
        let id = interp.label();
        let mut found = None;
        let result = interp.run(&self.expr, input, &mut |value| {
            found = Some(value);
            Err(EvalError::Break(id))
        });
        if let Some(first) = found {
            return Ok(first);
        }
        Interp::landed(id, result).map_err(|e| self.map_error(&e, timeout))?;
        Err(TransformError::empty_result(&self.source))
    }

    fn interp(&self, timeout: Option<Duration>) -> Interp {
        Interp::new(timeout.and_then(|t| Instant::now().checked_add(t)))
    }

    fn map_error(&self, error: &EvalError, timeout: Option<Duration>) -> TransformError {
        match error {
            EvalError::Timeout => {
                TransformError::timeout(&self.source, timeout.unwrap_or_default())
            }
            other => TransformError::evaluation(&self.source, other.message()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_errors_carry_the_query() {
        let err = Query::compile("invalid").unwrap_err();
        assert!(matches!(&err, TransformError::QueryParse { .. }));
        assert_eq!(err.query(), "invalid");
        assert!(err.to_string().contains("invalid/0 is not defined"));

        assert!(Query::compile(".a |").is_err());
        assert!(Query::compile("{").is_err());
    }

    #[test]
    fn test_first_output_wins() {
        let query = Query::compile(".[]").unwrap();
        assert_eq!(query.first(&json!([1, 2]), None).unwrap(), json!(1));
        assert_eq!(query.run_all(&json!([1, 2]), None).unwrap(), vec![json!(1), json!(2)]);

        let query = Query::compile("1, error(\"late\")").unwrap();
        assert_eq!(query.first(&Value::Null, None).unwrap(), json!(1));
        assert!(query.run_all(&Value::Null, None).is_err());
    }

    #[test]
    fn test_outputs_before_a_later_error_are_kept() {
        let query = Query::compile("(.a[] | tonumber) | . + 1").unwrap();
        let input = json!({"a": ["1", "x"]});
        assert_eq!(query.first(&input, None).unwrap(), json!(2));
        let err = query.run_all(&input, None).unwrap_err();
        assert!(matches!(err, TransformError::QueryEvaluation { .. }));
    }

    #[test]
    fn test_first_does_not_evaluate_later_outputs() {
        let query = Query::compile("1, (reduce range(1e18) as $i (0; . + 1))").unwrap();
        let value = query
            .first(&Value::Null, Some(Duration::from_millis(50)))
            .unwrap();
        assert_eq!(value, json!(1));
        let query = Query::compile("first(range(1e18))").unwrap();
        assert_eq!(query.first(&Value::Null, None).unwrap(), json!(0));
    }

    #[test]
    fn test_deep_queries_are_rejected_at_compile_time() {
        let source = "[".repeat(100_000);
        let err = Query::compile(&source).unwrap_err();
        assert!(matches!(&err, TransformError::QueryParse { .. }));
        assert!(err.to_string().contains("nests deeper than"));
        let source = format!("{}1{}", "[".repeat(20), "]".repeat(20));
        assert!(Query::compile(&source).is_ok());
    }

    #[test]
    fn test_deep_recursion_is_an_evaluation_error() {
        let query = Query::compile("def f: [f]; f").unwrap();
        let err = query.first(&Value::Null, None).unwrap_err();
        assert!(err.to_string().contains("nested deeper than"));
    }

    #[test]
    fn test_empty_result() {
        let query = Query::compile("empty").unwrap();
        let err = query.first(&Value::Null, None).unwrap_err();
        assert!(matches!(err, TransformError::QueryEmptyResult { .. }));
        assert!(err.to_string().contains("query did not return anything"));
    }

    #[test]
    fn test_evaluation_errors() {
        let query = Query::compile(".a.b").unwrap();
        let err = query.first(&json!({"a": 5}), None).unwrap_err();
        match err {
            TransformError::QueryEvaluation { cause, .. } => {
                assert_eq!(cause, "Cannot index number with \"b\"");
            }
            other => assert_eq!(other.to_string(), "an evaluation error"),
        }
    }

    #[test]
    fn test_timeout() {
        let query = Query::compile("[range(100000)] | length").unwrap();
        let err = query.first(&Value::Null, Some(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, TransformError::QueryTimeout { .. }));
    }
}
