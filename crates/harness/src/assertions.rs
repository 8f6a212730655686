//! The assertion engine.
//!
//! Assertions run against the final run context and the visited-state
//! history. `equals`, `contains`, and `not_contains` honor the
//! `case_sensitive` flag (default true); containment kinds optionally
//! interpret the expected value as a regular expression; `state_reached`
//! checks membership anywhere in the visited history.

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use waypoint_engine::render::display_value;
use waypoint_types::{AssertionKind, AssertionSpec};

use crate::report::AssertionOutcome;

/// Evaluate one assertion.
pub fn evaluate_assertion(
    assertion: &AssertionSpec,
    vars: &IndexMap<String, Value>,
    history: &[String],
) -> AssertionOutcome {
    let description = assertion.description.clone().unwrap_or_else(|| {
        format!("{} {}", kind_label(assertion.kind), assertion.target)
    });

    let (passed, detail) = match assertion.kind {
        AssertionKind::StateReached => {
            let reached = history.iter().any(|state| state == &assertion.target);
            (
                reached,
                (!reached).then(|| format!("state '{}' was never visited", assertion.target)),
            )
        }
        kind => match vars.get(&assertion.target) {
            None => (
                false,
                Some(format!("variable '{}' is not set", assertion.target)),
            ),
            Some(value) => {
                let actual = display_value(value);
                match expected_value(assertion) {
                    Err(detail) => (false, Some(detail)),
                    Ok(expected) => check(kind, assertion, &actual, expected),
                }
            }
        },
    };

    AssertionOutcome {
        description,
        passed,
        detail,
    }
}

fn kind_label(kind: AssertionKind) -> &'static str {
    match kind {
        AssertionKind::Equals => "equals",
        AssertionKind::Contains => "contains",
        AssertionKind::NotContains => "not_contains",
        AssertionKind::Regex => "regex",
        AssertionKind::StateReached => "state_reached",
    }
}

fn expected_value(assertion: &AssertionSpec) -> Result<&str, String> {
    assertion
        .value
        .as_deref()
        .ok_or_else(|| format!("{} assertions require a value", kind_label(assertion.kind)))
}

fn check(
    kind: AssertionKind,
    assertion: &AssertionSpec,
    actual: &str,
    expected: &str,
) -> (bool, Option<String>) {
    let outcome = match kind {
        AssertionKind::Equals => {
            if assertion.case_sensitive {
                actual == expected
            } else {
                actual.to_lowercase() == expected.to_lowercase()
            }
        }
        AssertionKind::Contains | AssertionKind::NotContains => {
            let found = if assertion.regex {
                match build_regex(expected, assertion.case_sensitive) {
                    Ok(pattern) => pattern.is_match(actual),
                    Err(detail) => return (false, Some(detail)),
                }
            } else if assertion.case_sensitive {
                actual.contains(expected)
            } else {
                actual.to_lowercase().contains(&expected.to_lowercase())
            };
            if kind == AssertionKind::NotContains {
                !found
            } else {
                found
            }
        }
        AssertionKind::Regex => match build_regex(expected, assertion.case_sensitive) {
            Ok(pattern) => pattern.is_match(actual),
            Err(detail) => return (false, Some(detail)),
        },
        AssertionKind::StateReached => unreachable!("handled before value lookup"),
    };

    let detail = (!outcome).then(|| {
        format!(
            "expected {} '{}', got '{}'",
            kind_label(kind),
            expected,
            truncate(actual)
        )
    });
    (outcome, detail)
}

fn build_regex(pattern: &str, case_sensitive: bool) -> Result<Regex, String> {
    let source = if case_sensitive {
        pattern.to_string()
    } else {
        format!("(?i){pattern}")
    };
    Regex::new(&source).map_err(|error| format!("invalid pattern '{pattern}': {error}"))
}

fn truncate(text: &str) -> String {
    const LIMIT: usize = 120;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let prefix: String = text.chars().take(LIMIT).collect();
        format!("{prefix}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assertion(kind: AssertionKind, target: &str, value: Option<&str>) -> AssertionSpec {
        AssertionSpec {
            kind,
            target: target.into(),
            value: value.map(String::from),
            description: None,
            case_sensitive: true,
            regex: false,
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> IndexMap<String, Value> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect()
    }

    #[test]
    fn contains_is_case_sensitive_by_default() {
        let store = vars(&[("summary", "Hello World")]);
        let strict = assertion(AssertionKind::Contains, "summary", Some("hello"));
        assert!(!evaluate_assertion(&strict, &store, &[]).passed);

        let mut relaxed = strict.clone();
        relaxed.case_sensitive = false;
        assert!(evaluate_assertion(&relaxed, &store, &[]).passed);
    }

    #[test]
    fn not_contains_negates_the_match() {
        let store = vars(&[("summary", "all clear")]);
        let spec = assertion(AssertionKind::NotContains, "summary", Some("outage"));
        assert!(evaluate_assertion(&spec, &store, &[]).passed);

        let spec = assertion(AssertionKind::NotContains, "summary", Some("clear"));
        assert!(!evaluate_assertion(&spec, &store, &[]).passed);
    }

    #[test]
    fn equals_honors_case_sensitivity() {
        let store = vars(&[("action", "Escalate")]);
        let strict = assertion(AssertionKind::Equals, "action", Some("escalate"));
        assert!(!evaluate_assertion(&strict, &store, &[]).passed);

        let mut relaxed = strict;
        relaxed.case_sensitive = false;
        assert!(evaluate_assertion(&relaxed, &store, &[]).passed);
    }

    #[test]
    fn regex_kind_matches_patterns() {
        let store = vars(&[("summary", "disk usage at 97%")]);
        let spec = assertion(AssertionKind::Regex, "summary", Some(r"\d+%"));
        assert!(evaluate_assertion(&spec, &store, &[]).passed);
    }

    #[test]
    fn contains_can_interpret_the_value_as_a_pattern() {
        let store = vars(&[("summary", "retry scheduled for 03:00")]);
        let mut spec = assertion(AssertionKind::Contains, "summary", Some(r"\d\d:\d\d"));
        spec.regex = true;
        assert!(evaluate_assertion(&spec, &store, &[]).passed);
    }

    #[test]
    fn invalid_patterns_fail_with_a_detail() {
        let store = vars(&[("summary", "anything")]);
        let spec = assertion(AssertionKind::Regex, "summary", Some("(unclosed"));
        let outcome = evaluate_assertion(&spec, &store, &[]);
        assert!(!outcome.passed);
        assert!(outcome.detail.expect("detail").contains("invalid pattern"));
    }

    #[test]
    fn state_reached_checks_the_whole_history() {
        let history = vec!["ask".to_string(), "escalate".to_string(), "done".to_string()];
        let spec = assertion(AssertionKind::StateReached, "escalate", None);
        assert!(evaluate_assertion(&spec, &IndexMap::new(), &history).passed);

        let spec = assertion(AssertionKind::StateReached, "archive", None);
        assert!(!evaluate_assertion(&spec, &IndexMap::new(), &history).passed);
    }

    #[test]
    fn missing_variables_fail_cleanly() {
        let spec = assertion(AssertionKind::Equals, "ghost", Some("x"));
        let outcome = evaluate_assertion(&spec, &IndexMap::new(), &[]);
        assert!(!outcome.passed);
        assert!(outcome.detail.expect("detail").contains("not set"));
    }

    #[test]
    fn missing_expected_value_fails_cleanly() {
        let store = vars(&[("summary", "text")]);
        let spec = assertion(AssertionKind::Contains, "summary", None);
        let outcome = evaluate_assertion(&spec, &store, &[]);
        assert!(!outcome.passed);
        assert!(outcome.detail.expect("detail").contains("require a value"));
    }
}
