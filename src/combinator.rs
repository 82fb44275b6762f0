//! Backtracking parser combinator toolkit used to build the criteria grammar.
//!
//! Parsers operate on a byte-offset cursor into the source string and either
//! produce a value plus the new cursor, or a [`ParseFailure`] recording how far
//! the parse got and what it expected there. `or` always retries its second
//! branch from the original cursor, so the grammar gets ordered choice with
//! full backtracking; failures from sibling branches are merged so the final
//! error reports the furthest position reached and every token expected there.

use std::collections::BTreeSet;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use regex::Regex;

pub type ParseResult<T> = Result<(T, usize), ParseFailure>;

/// A failed parse: the furthest offset reached and the tokens expected there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub position: usize,
    pub expected: BTreeSet<&'static str>,
}

impl ParseFailure {
    pub fn expecting(position: usize, label: &'static str) -> Self {
        let mut expected = BTreeSet::new();
        expected.insert(label);
        ParseFailure { position, expected }
    }

    /// Combine two sibling failures: the one that got further wins; ties keep
    /// the expectations of both.
    pub fn merge(self, other: ParseFailure) -> ParseFailure {
        match self.position.cmp(&other.position) {
            std::cmp::Ordering::Greater => self,
            std::cmp::Ordering::Less => other,
            std::cmp::Ordering::Equal => {
                let mut expected = self.expected;
                expected.extend(other.expected);
                ParseFailure {
                    position: self.position,
                    expected,
                }
            }
        }
    }
}

/// A cloneable handle to a parse function.
pub struct Parser<T>(Arc<dyn Fn(&str, usize) -> ParseResult<T> + Send + Sync>);

impl<T> Clone for Parser<T> {
    fn clone(&self) -> Self {
        Parser(Arc::clone(&self.0))
    }
}

impl<T: 'static> Parser<T> {
    pub fn new(f: impl Fn(&str, usize) -> ParseResult<T> + Send + Sync + 'static) -> Self {
        Parser(Arc::new(f))
    }

    pub fn run(&self, input: &str, position: usize) -> ParseResult<T> {
        (self.0)(input, position)
    }

    /// Transform the parsed value.
    pub fn map<U: 'static>(self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Parser<U> {
        let inner = self.0;
        Parser::new(move |input, pos| {
            let (value, pos) = inner(input, pos)?;
            Ok((f(value), pos))
        })
    }

    /// Sequence two parsers, keeping both results.
    pub fn then<U: 'static>(self, next: Parser<U>) -> Parser<(T, U)> {
        let first = self.0;
        let second = next.0;
        Parser::new(move |input, pos| {
            let (a, pos) = first(input, pos)?;
            let (b, pos) = second(input, pos)?;
            Ok(((a, b), pos))
        })
    }

    /// Sequence two parsers, keeping only the first result.
    pub fn skip<U: 'static>(self, next: Parser<U>) -> Parser<T> {
        self.then(next).map(|(a, _)| a)
    }

    /// Sequence two parsers, keeping only the second result.
    pub fn with<U: 'static>(self, next: Parser<U>) -> Parser<U> {
        self.then(next).map(|(_, b)| b)
    }

    /// Ordered choice. The second branch is tried from the cursor the first
    /// branch started at, no matter how much the first branch consumed before
    /// failing.
    pub fn or(self, other: Parser<T>) -> Parser<T> {
        let first = self.0;
        let second = other.0;
        Parser::new(move |input, pos| match first(input, pos) {
            Ok(ok) => Ok(ok),
            Err(e1) => match second(input, pos) {
                Ok(ok) => Ok(ok),
                Err(e2) => Err(e1.merge(e2)),
            },
        })
    }

    /// Zero or more repetitions. Stops at the first failure; a repetition that
    /// consumes nothing also stops the loop rather than spinning.
    pub fn many(self) -> Parser<Vec<T>> {
        let inner = self.0;
        Parser::new(move |input, pos| {
            let mut items = Vec::new();
            let mut cur = pos;
            while let Ok((item, next)) = inner(input, cur) {
                if next == cur {
                    break;
                }
                items.push(item);
                cur = next;
            }
            Ok((items, cur))
        })
    }

    /// Zero or more occurrences of `self` separated by `sep`. A trailing
    /// separator with no item after it is left unconsumed.
    pub fn sep_by<S: 'static>(self, sep: Parser<S>) -> Parser<Vec<T>> {
        let item = self.0;
        let sep = sep.0;
        Parser::new(move |input, pos| {
            let mut items = Vec::new();
            let mut cur = pos;
            match item(input, cur) {
                Err(_) => return Ok((items, cur)),
                Ok((first, next)) => {
                    items.push(first);
                    cur = next;
                }
            }
            loop {
                let after_sep = match sep(input, cur) {
                    Ok((_, p)) => p,
                    Err(_) => break,
                };
                match item(input, after_sep) {
                    Ok((v, p)) => {
                        items.push(v);
                        cur = p;
                    }
                    Err(_) => break,
                }
            }
            Ok((items, cur))
        })
    }
}

/// Match an exact literal token.
pub fn token(expected: &'static str) -> Parser<&'static str> {
    Parser::new(move |input, pos| {
        if input[pos..].starts_with(expected) {
            Ok((expected, pos + expected.len()))
        } else {
            Err(ParseFailure::expecting(pos, expected))
        }
    })
}

/// Match a regex anchored at the cursor. The pattern is compiled once, when
/// the grammar rule is constructed.
pub fn pattern(re: &str, label: &'static str) -> Parser<String> {
    let re = Regex::new(&format!(r"\A(?:{re})")).expect("grammar pattern must compile");
    Parser::new(move |input, pos| match re.find(&input[pos..]) {
        Some(m) => Ok((m.as_str().to_owned(), pos + m.end())),
        None => Err(ParseFailure::expecting(pos, label)),
    })
}

/// Consume any single character.
pub fn any_char() -> Parser<char> {
    Parser::new(|input, pos| match input[pos..].chars().next() {
        Some(c) => Ok((c, pos + c.len_utf8())),
        None => Err(ParseFailure::expecting(pos, "any character")),
    })
}

/// Defer construction of a parser until it is first used, which is how the
/// mutually recursive grammar rules reference each other without placeholder
/// patching. The rule function runs at most once per `lazy` site.
pub fn lazy<T: 'static>(rule: fn() -> Parser<T>) -> Parser<T> {
    let cell: OnceCell<Parser<T>> = OnceCell::new();
    Parser::new(move |input, pos| cell.get_or_init(rule).run(input, pos))
}

/// Run a parser and require it to consume the entire input.
pub fn parse_complete<T: 'static>(parser: &Parser<T>, input: &str) -> Result<T, ParseFailure> {
    let (value, pos) = parser.run(input, 0)?;
    if pos == input.len() {
        Ok(value)
    } else {
        Err(ParseFailure::expecting(pos, "end of input"))
    }
}
