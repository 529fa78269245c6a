//! The transform engine: compiled-query cache plus a per-query time budget.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use serde_json::Value;
use tracing::debug;

use crate::convert::InputScope;
use crate::error::Result;
use crate::query::Query;

/// Default evaluation budget for one query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

const CACHE_CAPACITY: u64 = 1024;

/// Evaluates queries against input scopes.
#[derive(Clone)]
pub struct TransformEngine {
    timeout: Duration,
    cache: Cache<String, Arc<Query>>,
}

impl Default for TransformEngine {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_TIMEOUT)
    }
}

impl std::fmt::Debug for TransformEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformEngine")
            .field("timeout", &self.timeout)
            .field("cached_queries", &self.cache.entry_count())
            .finish()
    }
}

impl TransformEngine {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cache: Cache::builder().max_capacity(CACHE_CAPACITY).build(),
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Compile `query`, reusing an earlier compilation of the same text.
    pub fn compile(&self, query: &str) -> Result<Arc<Query>> {
        if let Some(compiled) = self.cache.get(query) {
            return Ok(compiled);
        }
        let compiled = Arc::new(Query::compile(query)?);
        self.cache.insert(query.to_string(), Arc::clone(&compiled));
        debug!(query = %query, "Compiled query");
        Ok(compiled)
    }

    /// Evaluate `query` against the scope, returning its first output.
    pub fn evaluate(&self, scope: &InputScope, query: &str) -> Result<Value> {
        self.evaluate_value(&scope.to_value(), query)
    }

    /// Evaluate `query` against an arbitrary JSON value.
    pub fn evaluate_value(&self, input: &Value, query: &str) -> Result<Value> {
        self.compile(query)?.first(input, Some(self.timeout))
    }
}
