//! Evaluation errors

use thiserror::Error;

/// Errors that abort a single evaluation cycle
///
/// Missing data is not an error; it evaluates to `Undefined`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("Type mismatch: cannot apply {op} to {left} and {right}")]
    TypeMismatch {
        op: String,
        left: String,
        right: String,
    },

    #[error("Operator {op} is not supported for {kind} values")]
    UnsupportedOperator { op: String, kind: String },

    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    #[error("Both math operands hold several values ({left} and {right})")]
    ArrayMath { left: usize, right: usize },

    #[error("Invalid expression at {id}: {reason}")]
    InvalidExpression { id: String, reason: String },
}

/// Result type for evaluation operations
pub type EvalResult<T> = Result<T, EvalError>;

impl EvalError {
    pub(crate) fn mismatch(op: impl ToString, left: impl Into<String>, right: impl Into<String>) -> Self {
        EvalError::TypeMismatch {
            op: op.to_string(),
            left: left.into(),
            right: right.into(),
        }
    }

    pub(crate) fn invalid(id: &str, reason: impl Into<String>) -> Self {
        EvalError::InvalidExpression {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}
