//! The criteria grammar, built declaratively from the combinator toolkit.
//!
//! Ordered choice resolves every ambiguity in a fixed order: raw string
//! before number before quoted string for literals, and `get(`/`set(` before
//! plain field names for terms (a field that merely starts with `get` falls
//! back to a field name when the `(` never arrives). `conjunction` and
//! `disjunction` each bind at most one operator, so `a and b and c` does not
//! parse without explicit parentheses; parentheses recurse back to the top of
//! the grammar.

use once_cell::sync::Lazy;

use crate::combinator::{any_char, lazy, parse_complete, pattern, token, Parser};
use crate::expr::{CompareOp, Expr, MatchFn, Number, Value};
use crate::parse_error::ParseError;

/// Compile criteria source text into an expression tree. The entire input
/// must be consumed; trailing text is a syntax error at the first unconsumed
/// character.
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    parse_complete(&EXPRESSION, source).map_err(|failure| ParseError::new(source, failure))
}

static EXPRESSION: Lazy<Parser<Expr>> = Lazy::new(|| ignore().with(disjunction()));

/// Whitespace and `#`-to-end-of-line comments, skippable between any two
/// tokens.
fn ignore() -> Parser<()> {
    pattern(r"\s+", "whitespace")
        .or(pattern(r"#.*", "comment"))
        .many()
        .map(|_| ())
}

/// A token followed by skippable ignorables.
fn lexeme<T: 'static>(p: Parser<T>) -> Parser<T> {
    p.skip(ignore())
}

fn sym(tok: &'static str) -> Parser<&'static str> {
    lexeme(token(tok))
}

// ---------------------------------------------------------------------------
// literals
// ---------------------------------------------------------------------------

fn unescape(c: char) -> String {
    match c {
        // escaped literal newline is a line continuation
        '\n' => String::new(),
        'a' => "\x07".to_owned(),
        'b' => "\x08".to_owned(),
        'f' => "\x0c".to_owned(),
        'n' => "\n".to_owned(),
        'r' => "\r".to_owned(),
        't' => "\t".to_owned(),
        'v' => "\x0b".to_owned(),
        '\\' => "\\".to_owned(),
        // unknown escapes pass through as the two-character sequence
        other => format!("\\{}", other),
    }
}

/// One item of a cooked string body: a plain character or an interpreted
/// backslash escape. `class` excludes the active quote, newline, backslash.
fn cooked_item(class: &'static str) -> Parser<String> {
    pattern(class, "string character").or(token("\\").with(any_char()).map(unescape))
}

/// One item of a raw string body: backslash plus any character is kept
/// verbatim as both characters.
fn raw_item(class: &'static str) -> Parser<String> {
    pattern(class, "string character").or(token("\\").with(any_char()).map(|c| format!("\\{}", c)))
}

fn quoted_string() -> Parser<String> {
    let single = token("'")
        .with(cooked_item(r"[^'\n\\]").many())
        .skip(token("'"));
    let double = token("\"")
        .with(cooked_item(r#"[^"\n\\]"#).many())
        .skip(token("\""));
    single.or(double).map(|parts| parts.concat())
}

fn raw_string() -> Parser<String> {
    let single = token("r'")
        .with(raw_item(r"[^'\n\\]").many())
        .skip(token("'"));
    let double = token("r\"")
        .with(raw_item(r#"[^"\n\\]"#).many())
        .skip(token("\""));
    single.or(double).map(|parts| parts.concat())
}

fn number() -> Parser<Expr> {
    let float = pattern(r"\d+\.\d+", "number").map(|s| {
        Number::Float(s.parse::<f64>().unwrap_or(f64::INFINITY))
    });
    let int = pattern(r"\d+", "number").map(|s| {
        // digit runs too long for i64 degrade to floating point
        s.parse::<i64>()
            .map(Number::Int)
            .unwrap_or_else(|_| Number::Float(s.parse::<f64>().unwrap_or(f64::INFINITY)))
    });
    float.or(int).map(|n| Expr::Literal(Value::Number(n)))
}

/// Literal kinds in grammar order: raw string, number, quoted string.
fn literal() -> Parser<Expr> {
    lexeme(raw_string().map(|s| Expr::Literal(Value::Text(s))))
        .or(lexeme(number()))
        .or(lexeme(quoted_string().map(|s| Expr::Literal(Value::Text(s)))))
}

// ---------------------------------------------------------------------------
// terms
// ---------------------------------------------------------------------------

fn field_name() -> Parser<Expr> {
    lexeme(pattern(r"[A-Za-z_][0-9A-Za-z_-]*", "field name"))
        .map(|name| Expr::Field(Box::new(Expr::Literal(Value::Text(name)))))
}

fn field_getter() -> Parser<Expr> {
    sym("get")
        .with(sym("("))
        .with(literal())
        .skip(sym(")"))
        .map(|key| Expr::Field(Box::new(key)))
}

fn set_literal() -> Parser<Expr> {
    sym("set")
        .with(sym("("))
        .with(lazy(term))
        .skip(sym(")"))
        .map(|inner| Expr::Set(Box::new(inner)))
}

fn sequence_literal() -> Parser<Expr> {
    sym("[")
        .with(lazy(term).sep_by(sym(",")))
        .skip(sym("]"))
        .map(Expr::Sequence)
}

fn term() -> Parser<Expr> {
    literal()
        .or(field_getter())
        .or(set_literal())
        .or(field_name())
        .or(sequence_literal())
}

// ---------------------------------------------------------------------------
// comparisons and boolean structure
// ---------------------------------------------------------------------------

fn function_name() -> Parser<MatchFn> {
    lexeme(
        token("search")
            .map(|_| MatchFn::Search)
            .or(token("match").map(|_| MatchFn::Match))
            .or(token("cidrmatch").map(|_| MatchFn::CidrMatch)),
    )
}

fn function_call() -> Parser<Expr> {
    function_name()
        .skip(sym("("))
        .then(term())
        .skip(sym(","))
        .then(term())
        .skip(sym(")"))
        .map(|((function, pattern), subject)| Expr::Call {
            function,
            pattern: Box::new(pattern),
            subject: Box::new(subject),
        })
}

fn rel_op(tok: &'static str, op: CompareOp) -> Parser<Expr> {
    term()
        .skip(sym(tok))
        .then(term())
        .map(move |(left, right)| Expr::Comparison {
            left: Box::new(left),
            right: Box::new(right),
            op,
        })
}

/// `>=`/`<=` before `>`/`<` so the two-character operators win.
fn comparison() -> Parser<Expr> {
    rel_op("==", CompareOp::Eq)
        .or(rel_op("!=", CompareOp::Ne))
        .or(rel_op(">=", CompareOp::Ge))
        .or(rel_op("<=", CompareOp::Le))
        .or(rel_op(">", CompareOp::Gt))
        .or(rel_op("<", CompareOp::Lt))
        .or(parenthesized())
        .or(function_call())
}

fn parenthesized() -> Parser<Expr> {
    sym("(").with(lazy(disjunction)).skip(sym(")"))
}

fn bool_op(tok: &'static str, op: CompareOp, operand: fn() -> Parser<Expr>) -> Parser<Expr> {
    operand()
        .skip(sym(tok))
        .then(operand())
        .map(move |(left, right)| Expr::Comparison {
            left: Box::new(left),
            right: Box::new(right),
            op,
        })
        .or(operand())
}

/// Binds at most one `and`.
fn conjunction() -> Parser<Expr> {
    bool_op("and", CompareOp::And, comparison)
}

/// Binds at most one `or`.
fn disjunction() -> Parser<Expr> {
    bool_op("or", CompareOp::Or, conjunction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> Expr {
        Expr::Field(Box::new(Expr::Literal(Value::text(name))))
    }

    fn cmp(left: Expr, op: CompareOp, right: Expr) -> Expr {
        Expr::Comparison {
            left: Box::new(left),
            right: Box::new(right),
            op,
        }
    }

    /// Parse `<src> == 0` and return the left-hand term.
    fn term_of(src: &str) -> Expr {
        match parse(&format!("{} == 0", src)).unwrap() {
            Expr::Comparison { left, .. } => *left,
            other => panic!("expected comparison, got {:?}", other),
        }
    }

    fn text_of(src: &str) -> String {
        match term_of(src) {
            Expr::Literal(Value::Text(s)) => s,
            other => panic!("expected text literal, got {:?}", other),
        }
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(term_of("123"), Expr::Literal(Value::int(123)));
        assert_eq!(term_of("3.14"), Expr::Literal(Value::float(3.14)));
    }

    #[test]
    fn quoted_string_escapes() {
        assert_eq!(text_of("'abc'"), "abc");
        assert_eq!(text_of(r"'ab\tc'"), "ab\tc");
        assert_eq!(text_of(r#""ab\\c""#), "ab\\c");
        // unknown escapes pass through as two characters
        assert_eq!(text_of(r"'ab\qc'"), "ab\\qc");
        // escaped newline collapses to nothing
        assert_eq!(text_of("'ab\\\nc'"), "abc");
        // the other quote kind is a plain character
        assert_eq!(text_of(r#"'say "hi"'"#), "say \"hi\"");
    }

    #[test]
    fn raw_string_keeps_backslashes() {
        assert_eq!(text_of("r'abc'"), "abc");
        assert_eq!(text_of(r"r'ab\tc'"), "ab\\tc");
        assert_eq!(text_of(r#"r"ab\\c""#), "ab\\\\c");
    }

    #[test]
    fn unterminated_string_fails() {
        assert!(parse("'abc == x").is_err());
        assert!(parse(r#"x == "abc"#).is_err());
    }

    #[test]
    fn field_forms() {
        assert_eq!(term_of("user"), field("user"));
        assert_eq!(term_of("get(\"field with spaces\")"),
            Expr::Field(Box::new(Expr::Literal(Value::text("field with spaces")))));
        // identifier that merely starts with a keyword backtracks to a field
        assert_eq!(term_of("getx"), field("getx"));
        assert_eq!(term_of("settings"), field("settings"));
    }

    #[test]
    fn sequence_and_set_terms() {
        assert_eq!(
            term_of("[1, 2]"),
            Expr::Sequence(vec![Expr::Literal(Value::int(1)), Expr::Literal(Value::int(2))])
        );
        assert_eq!(term_of("[]"), Expr::Sequence(vec![]));
        assert_eq!(
            term_of("set([1])"),
            Expr::Set(Box::new(Expr::Sequence(vec![Expr::Literal(Value::int(1))])))
        );
        assert_eq!(
            term_of("set(get(\"users\"))"),
            Expr::Set(Box::new(Expr::Field(Box::new(Expr::Literal(Value::text(
                "users"
            ))))))
        );
    }

    #[test]
    fn function_call_forms() {
        assert_eq!(
            parse("search(\"pattern\", name)").unwrap(),
            Expr::Call {
                function: MatchFn::Search,
                pattern: Box::new(Expr::Literal(Value::text("pattern"))),
                subject: Box::new(field("name")),
            }
        );
        // exactly two arguments
        assert!(parse("search(\"pattern\")").is_err());
        assert!(parse("search(\"a\", b, c)").is_err());
    }

    #[test]
    fn relational_operators() {
        for (src, op) in [
            ("a == 1", CompareOp::Eq),
            ("a != 1", CompareOp::Ne),
            ("a >= 1", CompareOp::Ge),
            ("a <= 1", CompareOp::Le),
            ("a > 1", CompareOp::Gt),
            ("a < 1", CompareOp::Lt),
        ] {
            assert_eq!(
                parse(src).unwrap(),
                cmp(field("a"), op, Expr::Literal(Value::int(1))),
                "failed for {}",
                src
            );
        }
    }

    #[test]
    fn and_binds_single_occurrence() {
        let one = cmp(Expr::Literal(Value::int(1)), CompareOp::Eq, Expr::Literal(Value::int(1)));
        let two = cmp(Expr::Literal(Value::int(2)), CompareOp::Eq, Expr::Literal(Value::int(2)));
        assert_eq!(
            parse("1 == 1 and 2 == 2").unwrap(),
            cmp(one.clone(), CompareOp::And, two.clone())
        );

        // a three-term chain needs explicit parentheses
        assert!(parse("1 == 1 and 2 == 2 and 3 == 3").is_err());
        assert!(parse("(1 == 1 and 2 == 2) and 3 == 3").is_ok());

        // and binds tighter than or
        let three = cmp(Expr::Literal(Value::int(3)), CompareOp::Eq, Expr::Literal(Value::int(3)));
        assert_eq!(
            parse("1 == 1 and 2 == 2 or 3 == 3").unwrap(),
            cmp(
                cmp(one, CompareOp::And, two),
                CompareOp::Or,
                three
            )
        );
    }

    #[test]
    fn parentheses_nest_arbitrarily() {
        assert!(parse("((1 == 1 or 2 == 2) and (3 == 3 or 4 == 4)) or 5 == 5").is_ok());
    }

    #[test]
    fn comments_and_whitespace_interleave() {
        let src = "# suppress the admin account\nuser == 'admin' # exact match\n";
        assert_eq!(
            parse(src).unwrap(),
            cmp(field("user"), CompareOp::Eq, Expr::Literal(Value::text("admin")))
        );
        assert!(parse("  1 == 1 and 2 == 2").is_ok());
    }

    #[test]
    fn errors_report_position_and_expectations() {
        // unbalanced parenthesis
        let err = parse("(1 == 1").unwrap_err();
        assert!(err.position <= 7);
        assert!(err.expected().count() > 0);

        // trailing junk after a full expression
        let err = parse("1 == 1 garbage").unwrap_err();
        assert!(err.position <= 7, "position {} past first unconsumed token", err.position);

        // dangling operator
        let err = parse("user ==").unwrap_err();
        assert!(err.expected().count() > 0);

        // unknown operator
        assert!(parse("a ~= 1").is_err());
    }

    #[test]
    fn bare_term_is_not_a_criteria() {
        assert!(parse("user").is_err());
        assert!(parse("42").is_err());
    }
}
