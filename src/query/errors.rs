//! Query errors

use thiserror::Error;

/// Result type for query parsing and evaluation
pub type QueryResult<T> = Result<T, QueryError>;

/// Rejections raised while parsing a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// `$` operator with no meaning
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    /// Operator given an operand of the wrong shape
    #[error("Invalid operand for {operator}: {reason}")]
    InvalidOperand { operator: String, reason: String },

    /// `$regex` pattern does not compile
    #[error("Invalid regex {pattern:?}: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    /// Predicate is neither an object nor an array of objects
    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),
}

impl QueryError {
    pub(crate) fn operand(operator: &str, reason: impl Into<String>) -> Self {
        QueryError::InvalidOperand {
            operator: operator.to_string(),
            reason: reason.into(),
        }
    }
}
