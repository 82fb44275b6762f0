//! Tree-walking evaluator for criteria expressions.
//!
//! Evaluation is pure: it reads the record, appends human-readable entries to
//! the per-call trace, and performs no I/O. A parsed expression can be
//! evaluated concurrently against independent records since each call owns
//! its own [`Context`].
//!
//! Missing-field policy: an absent field is equal only to another absent
//! value, unequal to everything else, fails ordering comparisons with a type
//! mismatch, and is falsy under `and`/`or`.

use std::cmp::Ordering;
use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EvalError;
use crate::expr::{CompareOp, Expr, MatchFn, Number, Value};

/// The flat, string-keyed record a criteria expression is tested against.
pub type Record = HashMap<String, Value>;

/// Per-evaluation state: the read-only record and the append-only trace.
pub struct Context<'r> {
    record: &'r Record,
    trace: Vec<String>,
}

impl<'r> Context<'r> {
    pub fn new(record: &'r Record) -> Self {
        Context {
            record,
            trace: Vec::new(),
        }
    }

    /// Ordered log of every sub-evaluation performed so far.
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub fn into_trace(self) -> Vec<String> {
        self.trace
    }
}

/// Evaluate an expression against the context's record.
pub fn eval(expr: &Expr, ctx: &mut Context<'_>) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),

        Expr::Field(key) => {
            let key = eval(key, ctx)?;
            let looked_up = match &key {
                Value::Text(name) => ctx.record.get(name.as_str()).cloned(),
                // only string keys can exist in a record; anything else is
                // simply not found
                _ => None,
            };
            let value = looked_up.unwrap_or(Value::Absent);
            ctx.trace.push(format!("record['{}'] => {}", key, value));
            Ok(value)
        }

        Expr::Sequence(elements) => {
            let mut values = Vec::with_capacity(elements.len());
            for element in elements {
                values.push(eval(element, ctx)?);
            }
            Ok(Value::Sequence(values))
        }

        Expr::Set(inner) => match eval(inner, ctx)? {
            Value::Sequence(values) => Ok(Value::Set(dedup(values))),
            Value::Set(values) => Ok(Value::Set(values)),
            other => Err(EvalError::TypeMismatch {
                expected: "sequence",
                found: other.kind().to_owned(),
            }),
        },

        Expr::Call {
            function,
            pattern,
            subject,
        } => {
            let pattern = eval(pattern, ctx)?;
            let subject = eval(subject, ctx)?;
            let result = eval_call(*function, &pattern, &subject)?;
            ctx.trace
                .push(format!("{}({}, {}) => {}", function, pattern, subject, result));
            Ok(Value::Bool(result))
        }

        Expr::Comparison { left, right, op } => {
            let left = eval(left, ctx)?;
            let right = eval(right, ctx)?;
            let (left, right) = coerce_pair(left, right)?;
            let result = apply_op(*op, &left, &right)?;
            ctx.trace
                .push(format!("{} {} {} => {}", left, op, right, result));
            Ok(result)
        }
    }
}

// ---------------------------------------------------------------------------
// matching functions
// ---------------------------------------------------------------------------

static CIDR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})/(\d{1,2})$").expect("cidr shape")
});
static IP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})$").expect("ip shape"));

fn as_text<'v>(value: &'v Value, role: &'static str) -> Result<&'v str, EvalError> {
    match value {
        Value::Text(s) => Ok(s),
        other => Err(EvalError::TypeMismatch {
            expected: role,
            found: other.kind().to_owned(),
        }),
    }
}

fn eval_call(function: MatchFn, pattern: &Value, subject: &Value) -> Result<bool, EvalError> {
    match function {
        MatchFn::Search => {
            let re = Regex::new(as_text(pattern, "pattern string")?)?;
            Ok(re.is_match(as_text(subject, "subject string")?))
        }
        MatchFn::Match => {
            // anchor at the start of the subject only
            let re = Regex::new(&format!(r"\A(?:{})", as_text(pattern, "pattern string")?))?;
            Ok(re.is_match(as_text(subject, "subject string")?))
        }
        MatchFn::CidrMatch => cidr_match(
            as_text(pattern, "cidr string")?,
            as_text(subject, "ip string")?,
        ),
    }
}

/// Pack dotted-quad captures big-endian. Octets are not range-checked; `999`
/// is accepted and packed as-is.
fn packed_quad(caps: &regex::Captures<'_>) -> u64 {
    let octet = |i: usize| {
        caps.get(i)
            .map(|m| m.as_str().parse::<u64>().unwrap_or(0))
            .unwrap_or(0)
    };
    (octet(1) << 24) | (octet(2) << 16) | (octet(3) << 8) | octet(4)
}

fn cidr_match(cidr: &str, ip: &str) -> Result<bool, EvalError> {
    let caps = CIDR_RE
        .captures(cidr.trim())
        .ok_or_else(|| EvalError::InvalidCidr(cidr.to_owned()))?;
    let cidr_int = packed_quad(&caps);
    let mask_count: u32 = caps
        .get(5)
        .map(|m| m.as_str().parse().unwrap_or(0))
        .unwrap_or(0);
    // a two-digit prefix length can exceed the address width
    if mask_count > 32 {
        return Err(EvalError::InvalidCidr(cidr.to_owned()));
    }
    let mask: u64 = ((1u64 << mask_count) - 1) << (32 - mask_count);

    let caps = IP_RE
        .captures(ip.trim())
        .ok_or_else(|| EvalError::InvalidIp(ip.to_owned()))?;
    let ip_int = packed_quad(&caps);

    Ok((ip_int & mask) == (cidr_int & mask))
}

// ---------------------------------------------------------------------------
// comparison machinery
// ---------------------------------------------------------------------------

/// Booleans count as numeric, matching the coercion behavior of the alert
/// pipeline's other consumers.
fn is_numeric(value: &Value) -> bool {
    matches!(value, Value::Number(_) | Value::Bool(_))
}

fn numeric_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(true) => 1.0,
        Value::Bool(false) => 0.0,
        _ => f64::NAN,
    }
}

fn to_float(value: &Value) -> Result<f64, EvalError> {
    match value {
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| EvalError::NumericCoercion(s.clone())),
        other => Err(EvalError::NumericCoercion(other.to_string())),
    }
}

/// The single generic coercion rule: when exactly one operand is numeric, the
/// other is converted to a float before comparing.
fn coerce_pair(left: Value, right: Value) -> Result<(Value, Value), EvalError> {
    match (is_numeric(&left), is_numeric(&right)) {
        (true, false) => {
            let coerced = to_float(&right)?;
            Ok((left, Value::float(coerced)))
        }
        (false, true) => {
            let coerced = to_float(&left)?;
            Ok((Value::float(coerced), right))
        }
        _ => Ok((left, right)),
    }
}

/// Non-coercing equality: numbers compare across widths, sequences compare
/// element-wise in order, sets compare by mutual containment, absent equals
/// only absent, and differing kinds are unequal.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Text(x), Value::Text(y)) => x == y,
        (Value::Sequence(xs), Value::Sequence(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| value_eq(x, y))
        }
        (Value::Set(xs), Value::Set(ys)) => subset(xs, ys) && subset(ys, xs),
        (Value::Absent, Value::Absent) => true,
        (x, y) if is_numeric(x) && is_numeric(y) => match (x, y) {
            (Value::Number(Number::Int(n)), Value::Number(Number::Int(m))) => n == m,
            _ => numeric_f64(x) == numeric_f64(y),
        },
        _ => false,
    }
}

fn subset(xs: &[Value], ys: &[Value]) -> bool {
    xs.iter().all(|x| ys.iter().any(|y| value_eq(x, y)))
}

/// Natural ordering for the orderable kinds; everything else is a type
/// mismatch, including any comparison against an absent value.
fn value_cmp(a: &Value, b: &Value) -> Result<Ordering, EvalError> {
    match (a, b) {
        (x, y) if is_numeric(x) && is_numeric(y) => match (x, y) {
            (Value::Number(Number::Int(n)), Value::Number(Number::Int(m))) => Ok(n.cmp(m)),
            _ => numeric_f64(x)
                .partial_cmp(&numeric_f64(y))
                .ok_or_else(|| EvalError::TypeMismatch {
                    expected: "comparable numbers",
                    found: "nan".to_owned(),
                }),
        },
        (Value::Text(x), Value::Text(y)) => Ok(x.cmp(y)),
        (Value::Sequence(xs), Value::Sequence(ys)) => {
            for (x, y) in xs.iter().zip(ys.iter()) {
                let ord = value_cmp(x, y)?;
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ok(xs.len().cmp(&ys.len()))
        }
        (x, y) => Err(EvalError::TypeMismatch {
            expected: "values of one orderable kind",
            found: format!("{} and {}", x.kind(), y.kind()),
        }),
    }
}

/// Subset-or-equality semantics for sets: `<=` is subset, `<` proper subset,
/// mirrored for `>=`/`>`.
fn set_relation(op: CompareOp, a: &[Value], b: &[Value]) -> bool {
    match op {
        CompareOp::Le => subset(a, b),
        CompareOp::Lt => subset(a, b) && !subset(b, a),
        CompareOp::Ge => subset(b, a),
        CompareOp::Gt => subset(b, a) && !subset(a, b),
        _ => false,
    }
}

fn apply_op(op: CompareOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let result = match op {
        CompareOp::Eq => value_eq(left, right),
        CompareOp::Ne => !value_eq(left, right),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => match (left, right) {
            (Value::Set(a), Value::Set(b)) => set_relation(op, a, b),
            _ => {
                let ord = value_cmp(left, right)?;
                match op {
                    CompareOp::Lt => ord == Ordering::Less,
                    CompareOp::Le => ord != Ordering::Greater,
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::Ge => ord != Ordering::Less,
                    _ => unreachable!("relational arm matched above"),
                }
            }
        },
        CompareOp::And => left.is_truthy() && right.is_truthy(),
        CompareOp::Or => left.is_truthy() || right.is_truthy(),
    };
    Ok(Value::Bool(result))
}

fn dedup(values: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(values.len());
    for v in values {
        if !out.iter().any(|seen| value_eq(seen, &v)) {
            out.push(v);
        }
    }
    out
}
