//! Parse error reporting with rich diagnostics.
//!
//! The combinator layer reports a bare byte offset plus the set of tokens
//! expected there; this module attaches the source text, derives line/column,
//! and renders through Miette so the CLI gets compiler-quality messages.

use std::collections::BTreeSet;

use itertools::Itertools;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::combinator::ParseFailure;

#[derive(Debug, Error, Diagnostic)]
#[error("syntax error at line {line}, column {column}: expected {expected_summary}")]
#[diagnostic(code(criteria::parse))]
pub struct ParseError {
    #[source_code]
    src: NamedSource<String>,

    #[label("unexpected input here")]
    span: SourceSpan,

    #[help]
    help_text: Option<String>,

    /// Byte offset of the furthest position the parser reached.
    pub position: usize,
    /// 1-based line of `position`.
    pub line: usize,
    /// 1-based column of `position`.
    pub column: usize,

    expected: BTreeSet<&'static str>,
    expected_summary: String,
}

impl ParseError {
    pub(crate) fn new(source: &str, failure: ParseFailure) -> Self {
        let (line, column) = line_col(source, failure.position);
        let expected_summary = failure.expected.iter().join(" or ");
        let span_len = source[failure.position..]
            .chars()
            .next()
            .map(|c| c.len_utf8())
            .unwrap_or(0);
        ParseError {
            src: NamedSource::new("criteria", source.to_string()),
            span: (failure.position, span_len).into(),
            help_text: Some(format!("expected {}", expected_summary)),
            position: failure.position,
            line,
            column,
            expected: failure.expected,
            expected_summary,
        }
    }

    /// The tokens that would have allowed the parse to continue.
    pub fn expected(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.expected.iter().copied()
    }
}

fn line_col(source: &str, position: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for c in source[..position].chars() {
        if c == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}
