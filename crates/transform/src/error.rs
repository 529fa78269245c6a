//! Error types for the transform engine.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for transform operations.
pub type Result<T> = std::result::Result<T, TransformError>;

/// Query failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    /// The query does not compile.
    #[error("parse query {query:?}: {reason}")]
    QueryParse { query: String, reason: String },

    /// Evaluation raised an error.
    #[error("query {query:?}: {cause}")]
    QueryEvaluation { query: String, cause: String },

    /// The query produced no output at all.
    #[error("query did not return anything: {query:?}")]
    QueryEmptyResult { query: String },

    /// The evaluation budget ran out.
    #[error("query {query:?} timed out after {}ms", timeout.as_millis())]
    QueryTimeout { query: String, timeout: Duration },
}

impl TransformError {
    /// Create a parse error.
    pub fn parse(query: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::QueryParse {
            query: query.into(),
            reason: reason.into(),
        }
    }

    /// Create an evaluation error.
    pub fn evaluation(query: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::QueryEvaluation {
            query: query.into(),
            cause: cause.into(),
        }
    }

    /// Create an empty result error.
    pub fn empty_result(query: impl Into<String>) -> Self {
        Self::QueryEmptyResult {
            query: query.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(query: impl Into<String>, timeout: Duration) -> Self {
        Self::QueryTimeout {
            query: query.into(),
            timeout,
        }
    }

    /// The query text the error is about.
    #[must_use]
    pub fn query(&self) -> &str {
        match self {
            Self::QueryParse { query, .. }
            | Self::QueryEvaluation { query, .. }
            | Self::QueryEmptyResult { query }
            | Self::QueryTimeout { query, .. } => query,
        }
    }
}

/// Conversion failures at the output boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    /// A field value could not be serialised.
    #[error("marshal key {key}: {reason}")]
    Marshal { key: String, reason: String },
}

impl ConvertError {
    /// Create a marshal error.
    pub fn marshal(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Marshal {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_uses_millis() {
        let err = TransformError::timeout(".a", Duration::from_secs(5));
        assert_eq!(err.to_string(), "query \".a\" timed out after 5000ms");
        assert_eq!(err.query(), ".a");
    }

    #[test]
    fn test_empty_result_display() {
        let err = TransformError::empty_result("empty");
        assert_eq!(err.to_string(), "query did not return anything: \"empty\"");
    }
}
