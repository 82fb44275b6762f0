use chrono::NaiveDate;
use criteria::whitelist::{RuleRow, Whitelist};
use criteria::{Record, Value};
use slog::{o, Discard, Logger};

fn quiet() -> Logger {
    Logger::root(Discard, o!())
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn row(name: &str, alert_type: &str, start: &str, end: &str, criteria: &str) -> RuleRow {
    RuleRow {
        name: name.to_string(),
        alert_type: alert_type.to_string(),
        start: start.to_string(),
        end: end.to_string(),
        criteria: criteria.to_string(),
    }
}

fn record(pairs: &[(&str, Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ==============================================================================

#[test]
fn matching_rule_suppresses_record() {
    let wl = Whitelist::from_rows(
        [row(
            "scanner hosts",
            "bruteforce",
            "2024-01-01",
            "2030-01-01",
            "cidrmatch(\"10.0.0.0/8\", clientip)",
        )],
        &quiet(),
    );
    let rec = record(&[("clientip", Value::text("10.10.20.30"))]);
    assert!(wl.is_whitelisted("bruteforce", date("2024-06-01"), &rec, &quiet()));

    let rec = record(&[("clientip", Value::text("11.10.20.30"))]);
    assert!(!wl.is_whitelisted("bruteforce", date("2024-06-01"), &rec, &quiet()));
}

#[test]
fn rules_outside_validity_window_are_skipped() {
    let wl = Whitelist::from_rows(
        [row("short lived", "bruteforce", "2024-01-01", "2024-01-31", "1 == 1")],
        &quiet(),
    );
    let rec = Record::new();
    // inclusive bounds
    assert!(wl.is_whitelisted("bruteforce", date("2024-01-01"), &rec, &quiet()));
    assert!(wl.is_whitelisted("bruteforce", date("2024-01-31"), &rec, &quiet()));
    assert!(!wl.is_whitelisted("bruteforce", date("2023-12-31"), &rec, &quiet()));
    assert!(!wl.is_whitelisted("bruteforce", date("2024-02-01"), &rec, &quiet()));
}

#[test]
fn rules_only_apply_to_their_alert_type() {
    let wl = Whitelist::from_rows(
        [row("any", "bruteforce", "2024-01-01", "2030-01-01", "1 == 1")],
        &quiet(),
    );
    let rec = Record::new();
    assert!(wl.is_whitelisted("bruteforce", date("2024-06-01"), &rec, &quiet()));
    assert!(!wl.is_whitelisted("exfiltration", date("2024-06-01"), &rec, &quiet()));
}

#[test]
fn unparseable_criteria_fail_closed_and_later_rules_still_run() {
    let wl = Whitelist::from_rows(
        [
            row("broken", "bruteforce", "2024-01-01", "2030-01-01", "user == ("),
            row("working", "bruteforce", "2024-01-01", "2030-01-01", "user == \"admin\""),
        ],
        &quiet(),
    );
    let rec = record(&[("user", Value::text("admin"))]);
    assert!(wl.is_whitelisted("bruteforce", date("2024-06-01"), &rec, &quiet()));

    let rec = record(&[("user", Value::text("guest"))]);
    assert!(!wl.is_whitelisted("bruteforce", date("2024-06-01"), &rec, &quiet()));
}

#[test]
fn evaluation_errors_fail_closed() {
    // coercion failure on this record must not suppress it
    let wl = Whitelist::from_rows(
        [row("thresh", "bruteforce", "2024-01-01", "2030-01-01", "count > 10")],
        &quiet(),
    );
    let rec = record(&[("count", Value::text("banana"))]);
    assert!(!wl.is_whitelisted("bruteforce", date("2024-06-01"), &rec, &quiet()));
}

#[test]
fn rows_with_malformed_dates_are_dropped() {
    let wl = Whitelist::from_rows(
        [
            row("bad", "bruteforce", "01/01/2024", "2030-01-01", "1 == 1"),
            row("good", "bruteforce", "2024-01-01", "2030-01-01", "1 == 1"),
        ],
        &quiet(),
    );
    assert_eq!(wl.rules().len(), 1);
    assert_eq!(wl.rules()[0].name, "good");
}

#[test]
fn criteria_parse_once_and_report_trace() {
    let wl = Whitelist::from_rows(
        [row("admin", "bruteforce", "2024-01-01", "2030-01-01", "user == \"admin\"")],
        &quiet(),
    );
    let rule = &wl.rules()[0];
    // both calls hit the same cached parse
    assert!(rule.compiled().is_ok());
    assert!(rule.compiled().is_ok());

    let rec = record(&[("user", Value::text("admin"))]);
    let (matched, trace) = rule.matches(&rec);
    assert!(matched.unwrap());
    assert_eq!(
        trace,
        ["record['user'] => admin", "admin == admin => true"]
    );
}
