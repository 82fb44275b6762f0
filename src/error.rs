//! Evaluation-time error taxonomy.
//!
//! None of these are recovered inside the engine; they propagate to the
//! caller as the failure outcome for that (rule, record) pair. Callers are
//! expected to fail closed: a rule whose evaluation errors does not suppress
//! the record.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    /// Defined failure for a function name outside the built-in set. The
    /// grammar cannot currently produce one, but widening the function enum
    /// must surface here rather than panic.
    #[error("invalid function name: {0}")]
    UnknownFunction(String),

    #[error("invalid cidr: {0}")]
    InvalidCidr(String),

    #[error("invalid ip: {0}")]
    InvalidIp(String),

    #[error("cannot convert '{0}' to a number")]
    NumericCoercion(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },

    #[error("invalid regex pattern: {0}")]
    BadPattern(#[from] regex::Error),
}
