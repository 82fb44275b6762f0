//! Whitelist rules: named, time-windowed criteria used to suppress matching
//! alert records before insertion.
//!
//! Rule rows arrive from the app's key-value store as plain strings; this
//! module owns parsing the validity window, lazily compiling each rule's
//! criteria (once per batch), and the fail-closed evaluation loop: a rule
//! that fails to parse or errors during evaluation never suppresses a record,
//! and never stops the remaining rules from being checked.

use chrono::NaiveDate;
use once_cell::sync::OnceCell;
use slog::{debug, warn, Logger};

use crate::error::EvalError;
use crate::eval::{eval, Context, Record};
use crate::expr::Expr;
use crate::parse_error::ParseError;
use crate::parser::parse;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A whitelist rule row as loaded from the store, before validation.
#[derive(Debug, Clone)]
pub struct RuleRow {
    pub name: String,
    pub alert_type: String,
    pub start: String,
    pub end: String,
    pub criteria: String,
}

/// A validated rule. The criteria text is compiled on first use and the
/// parse outcome is cached for the rest of the batch.
pub struct Rule {
    pub name: String,
    pub alert_type: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub criteria: String,
    compiled: OnceCell<Result<Expr, ParseError>>,
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        alert_type: impl Into<String>,
        start: NaiveDate,
        end: NaiveDate,
        criteria: impl Into<String>,
    ) -> Self {
        Rule {
            name: name.into(),
            alert_type: alert_type.into(),
            start,
            end,
            criteria: criteria.into(),
            compiled: OnceCell::new(),
        }
    }

    /// Validity window check, inclusive on both ends.
    pub fn active_on(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Parse the criteria text, at most once.
    pub fn compiled(&self) -> Result<&Expr, &ParseError> {
        self.compiled
            .get_or_init(|| parse(&self.criteria))
            .as_ref()
    }

    /// Evaluate this rule against one record, returning the boolean outcome
    /// and the evaluation trace.
    pub fn matches(&self, record: &Record) -> (Result<bool, RuleError<'_>>, Vec<String>) {
        let expr = match self.compiled() {
            Ok(expr) => expr,
            Err(err) => return (Err(RuleError::Parse(err)), Vec::new()),
        };
        let mut ctx = Context::new(record);
        let result = match eval(expr, &mut ctx) {
            Ok(value) => Ok(value.is_truthy()),
            Err(err) => Err(RuleError::Eval(err)),
        };
        (result, ctx.into_trace())
    }
}

/// Why a rule failed to apply to a record.
#[derive(Debug)]
pub enum RuleError<'a> {
    Parse(&'a ParseError),
    Eval(EvalError),
}

impl std::fmt::Display for RuleError<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleError::Parse(e) => write!(f, "{}", e),
            RuleError::Eval(e) => write!(f, "{}", e),
        }
    }
}

/// The loaded rule set for one batch.
pub struct Whitelist {
    rules: Vec<Rule>,
}

impl Whitelist {
    pub fn new(rules: Vec<Rule>) -> Self {
        Whitelist { rules }
    }

    /// Build a whitelist from raw store rows. Rows with malformed dates are
    /// skipped with a warning; a bad row must never abort the batch.
    pub fn from_rows(rows: impl IntoIterator<Item = RuleRow>, log: &Logger) -> Self {
        let mut rules = Vec::new();
        for row in rows {
            let start = NaiveDate::parse_from_str(row.start.trim(), DATE_FORMAT);
            let end = NaiveDate::parse_from_str(row.end.trim(), DATE_FORMAT);
            match (start, end) {
                (Ok(start), Ok(end)) => rules.push(Rule::new(
                    row.name,
                    row.alert_type,
                    start,
                    end,
                    row.criteria,
                )),
                _ => {
                    warn!(log, "skipping whitelist rule with invalid dates";
                        "rule" => %row.name,
                        "start" => %row.start,
                        "end" => %row.end);
                }
            }
        }
        Whitelist { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// True if any active rule of the given type matches the record.
    ///
    /// Fail-closed: a rule whose criteria fail to parse or whose evaluation
    /// errors is logged and treated as not matching, and the remaining rules
    /// are still consulted.
    pub fn is_whitelisted(
        &self,
        alert_type: &str,
        date: NaiveDate,
        record: &Record,
        log: &Logger,
    ) -> bool {
        for rule in self
            .rules
            .iter()
            .filter(|r| r.alert_type == alert_type && r.active_on(date))
        {
            match rule.matches(record) {
                (Ok(true), trace) => {
                    debug!(log, "record suppressed by whitelist rule";
                        "rule" => %rule.name,
                        "trace" => ?trace);
                    return true;
                }
                (Ok(false), _) => {}
                (Err(err), _) => {
                    warn!(log, "whitelist rule did not apply";
                        "rule" => %rule.name,
                        "error" => %err);
                }
            }
        }
        false
    }
}
