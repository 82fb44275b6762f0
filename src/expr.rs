//! Expression tree and dynamic values for the criteria language.

use std::fmt;

use itertools::Itertools;

/// A numeric value. Integer and float literals stay distinct so traces render
/// them the way the analyst wrote them; comparisons promote through `f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Int(n) => *n as f64,
            Number::Float(f) => *f,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(n) => write!(f, "{}", n),
            // keep the decimal point so a float stays recognizable as one
            Number::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{:.1}", x),
            Number::Float(x) => write!(f, "{}", x),
        }
    }
}

/// A dynamically typed value: a record field, a literal, or an evaluation
/// result. The union is closed so the comparison logic can match exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(Number),
    Text(String),
    Bool(bool),
    Sequence(Vec<Value>),
    /// Deduplicated, order-irrelevant collection. The elements are kept as a
    /// plain vector (values are not hashable across numeric widths); all set
    /// operations go through semantic equality.
    Set(Vec<Value>),
    /// A field that was looked up but not present in the record.
    Absent,
}

impl Value {
    pub fn int(n: i64) -> Value {
        Value::Number(Number::Int(n))
    }

    pub fn float(f: f64) -> Value {
        Value::Number(Number::Float(f))
    }

    pub fn text(s: impl Into<String>) -> Value {
        Value::Text(s.into())
    }

    /// Truthiness: zero, empty, and absent values are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Number(n) => n.as_f64() != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::Sequence(vs) => !vs.is_empty(),
            Value::Set(vs) => !vs.is_empty(),
            Value::Absent => false,
        }
    }

    /// One-word description of the value's kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Text(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Sequence(_) => "sequence",
            Value::Set(_) => "set",
            Value::Absent => "absent",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Sequence(vs) => write!(f, "[{}]", vs.iter().join(", ")),
            Value::Set(vs) => write!(f, "{{{}}}", vs.iter().join(", ")),
            Value::Absent => write!(f, "None"),
        }
    }
}

/// The three built-in matching functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFn {
    /// Regex match anywhere in the subject.
    Search,
    /// Regex match starting at the beginning of the subject.
    Match,
    /// CIDR block containment test.
    CidrMatch,
}

impl fmt::Display for MatchFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchFn::Search => "search",
            MatchFn::Match => "match",
            MatchFn::CidrMatch => "cidrmatch",
        };
        write!(f, "{}", name)
    }
}

/// Comparison operators, including `and`/`or` which share the comparison
/// machinery (both operands are always evaluated; no short-circuiting).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tok = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::And => "and",
            CompareOp::Or => "or",
        };
        write!(f, "{}", tok)
    }
}

/// An immutable criteria expression tree. Built once per rule text, never
/// mutated, and safe to evaluate concurrently against independent records.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// A record field lookup. The key is itself an expression (almost always
    /// a string literal) so both bare identifiers and `get("any name")` work.
    Field(Box<Expr>),
    Sequence(Vec<Expr>),
    /// Wraps an expression expected to evaluate to a sequence.
    Set(Box<Expr>),
    Call {
        function: MatchFn,
        pattern: Box<Expr>,
        subject: Box<Expr>,
    },
    Comparison {
        left: Box<Expr>,
        right: Box<Expr>,
        op: CompareOp,
    },
}

impl Expr {
    /// Indented multi-line rendering of the tree, for debugging rules.
    pub fn ast(&self) -> String {
        let mut out = String::new();
        self.ast_indent(0, &mut out);
        out
    }

    fn ast_indent(&self, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        match self {
            Expr::Literal(v) => {
                out.push_str(&indent);
                out.push_str(&v.to_string());
            }
            Expr::Field(key) => {
                out.push_str(&indent);
                out.push_str(&format!("record[{}]", key));
            }
            Expr::Sequence(elements) => {
                out.push_str(&indent);
                out.push_str("[\n");
                for e in elements {
                    e.ast_indent(depth + 1, out);
                    out.push('\n');
                }
                out.push_str(&indent);
                out.push(']');
            }
            Expr::Set(inner) => {
                out.push_str(&indent);
                out.push_str("set(\n");
                inner.ast_indent(depth + 1, out);
                out.push('\n');
                out.push_str(&indent);
                out.push(')');
            }
            Expr::Call {
                function,
                pattern,
                subject,
            } => {
                out.push_str(&indent);
                out.push_str(&format!("({}\n", function));
                pattern.ast_indent(depth + 1, out);
                out.push('\n');
                subject.ast_indent(depth + 1, out);
                out.push('\n');
                out.push_str(&indent);
                out.push(')');
            }
            Expr::Comparison { left, right, op } => {
                out.push_str(&indent);
                out.push_str(&format!("({}\n", op));
                left.ast_indent(depth + 1, out);
                out.push('\n');
                right.ast_indent(depth + 1, out);
                out.push('\n');
                out.push_str(&indent);
                out.push(')');
            }
        }
    }
}

fn is_bare_field_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Quote a string the way the language can read it back. Prefers double
/// quotes; strings containing a double quote switch to single quotes. An
/// occurrence of the chosen quote character is backslashed, which the escape
/// rules keep as two characters rather than terminating the string.
fn quote_text(s: &str, out: &mut fmt::Formatter<'_>) -> fmt::Result {
    let quote = if s.contains('"') { '\'' } else { '"' };
    write!(out, "{}", quote)?;
    for c in s.chars() {
        match c {
            '\\' => write!(out, "\\\\")?,
            '\n' => write!(out, "\\n")?,
            '\t' => write!(out, "\\t")?,
            '\r' => write!(out, "\\r")?,
            '\x07' => write!(out, "\\a")?,
            '\x08' => write!(out, "\\b")?,
            '\x0b' => write!(out, "\\v")?,
            '\x0c' => write!(out, "\\f")?,
            c if c == quote => write!(out, "\\{}", c)?,
            c => write!(out, "{}", c)?,
        }
    }
    write!(out, "{}", quote)
}

/// Renders the expression back to parseable criteria source.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::Text(s)) => quote_text(s, f),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Field(key) => match key.as_ref() {
                Expr::Literal(Value::Text(name)) if is_bare_field_name(name) => {
                    write!(f, "{}", name)
                }
                other => write!(f, "get({})", other),
            },
            Expr::Sequence(elements) => write!(f, "[{}]", elements.iter().join(", ")),
            Expr::Set(inner) => write!(f, "set({})", inner),
            Expr::Call {
                function,
                pattern,
                subject,
            } => write!(f, "{}({}, {})", function, pattern, subject),
            Expr::Comparison { left, right, op } => match op {
                // and/or operands are comparisons themselves; parenthesize so
                // the rendering reparses under the one-operator-per-level rule
                CompareOp::And | CompareOp::Or => {
                    write!(f, "({}) {} ({})", left, op, right)
                }
                _ => write!(f, "{} {} {}", left, op, right),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_display_keeps_float_point() {
        assert_eq!(Value::int(15).to_string(), "15");
        assert_eq!(Value::float(15.0).to_string(), "15.0");
        assert_eq!(Value::float(3.14).to_string(), "3.14");
    }

    #[test]
    fn sequence_and_set_display() {
        let seq = Value::Sequence(vec![Value::text("a"), Value::int(2)]);
        assert_eq!(seq.to_string(), "[a, 2]");
        let set = Value::Set(vec![Value::int(1), Value::int(2)]);
        assert_eq!(set.to_string(), "{1, 2}");
    }

    #[test]
    fn truthiness() {
        assert!(Value::int(1).is_truthy());
        assert!(!Value::int(0).is_truthy());
        assert!(!Value::text("").is_truthy());
        assert!(Value::text("x").is_truthy());
        assert!(!Value::Absent.is_truthy());
        assert!(!Value::Sequence(vec![]).is_truthy());
    }

    #[test]
    fn render_field_forms() {
        let bare = Expr::Field(Box::new(Expr::Literal(Value::text("user"))));
        assert_eq!(bare.to_string(), "user");

        let spaced = Expr::Field(Box::new(Expr::Literal(Value::text("field with spaces"))));
        assert_eq!(spaced.to_string(), "get(\"field with spaces\")");
    }

    #[test]
    fn render_escapes_in_literals() {
        let e = Expr::Literal(Value::text("ab\tc"));
        assert_eq!(e.to_string(), "\"ab\\tc\"");

        let quoted = Expr::Literal(Value::text("say \"hi\""));
        assert_eq!(quoted.to_string(), "'say \"hi\"'");
    }

    #[test]
    fn render_and_or_parenthesizes() {
        let cmp = |field: &str, n: i64| Expr::Comparison {
            left: Box::new(Expr::Field(Box::new(Expr::Literal(Value::text(field))))),
            right: Box::new(Expr::Literal(Value::int(n))),
            op: CompareOp::Eq,
        };
        let e = Expr::Comparison {
            left: Box::new(cmp("a", 1)),
            right: Box::new(cmp("b", 2)),
            op: CompareOp::And,
        };
        assert_eq!(e.to_string(), "(a == 1) and (b == 2)");
    }
}
