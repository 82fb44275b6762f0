//! A small, safe boolean expression language for whitelisting alert records.
//!
//! Analysts write criteria such as
//!
//! ```text
//! match("admin.*", user) and cidrmatch("10.0.0.0/8", clientip)
//! ```
//!
//! which compile once into an immutable [`Expr`] and are then evaluated
//! against flat string-keyed records, yielding a boolean outcome plus an
//! ordered human-readable trace of every sub-evaluation for audit logging.
//!
//! Parsing and evaluation are pure and synchronous: no I/O, no shared mutable
//! state. A parsed expression may be evaluated concurrently against
//! independent records.

pub mod combinator;
mod error;
mod eval;
mod expr;
mod parse_error;
mod parser;
pub mod whitelist;

pub use error::EvalError;
pub use eval::{eval, Context, Record};
pub use expr::{CompareOp, Expr, MatchFn, Number, Value};
pub use parse_error::ParseError;
pub use parser::parse;

/// Evaluate a compiled expression against one record, returning the outcome
/// together with the evaluation trace. The trace is returned even when
/// evaluation fails, so callers can log what was checked before the error.
pub fn evaluate(expr: &Expr, record: &Record) -> (Result<Value, EvalError>, Vec<String>) {
    let mut ctx = Context::new(record);
    let result = eval(expr, &mut ctx);
    (result, ctx.into_trace())
}
