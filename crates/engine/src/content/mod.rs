//! Derivation of display content from assertion records.
//!
//! [`derive_content`] is a pure function: it starts from default slots
//! (expected value on the left, actual value on the right) and lets the
//! assertion's kind override them. Unknown kinds keep the defaults.

mod diff;

use iview_types::{
    Assertion, AssertionKind, Comparison, ExceptionCheck, Fragment, Highlight, KeyCheck, LineDelta, Markup,
    Membership, Message, RawContent, SliceComparison, Tolerance, Truth, DisplayContent,
};
use iview_util::{bracketed_list, display_value, linkify};
use serde_json::Value;

pub use diff::{SequenceItems, SliceIndices, diff_position, split_at_char};

const EXPECTED_TITLE: &str = "Expected:";
const VALUE_TITLE: &str = "Value:";
const NOT_MARKER: &str = "<not> ";

/// Compute the display slots for one assertion.
pub fn derive_content(assertion: &Assertion) -> DisplayContent {
    let defaults = default_content(assertion);
    match &assertion.kind {
        AssertionKind::Log(message) => log_content(message, defaults),
        AssertionKind::Fail(message) => DisplayContent {
            left_content: None,
            right_content: None,
            ..log_content(message, defaults)
        },
        AssertionKind::Equal => equal_content(assertion, defaults),
        AssertionKind::NotEqual => DisplayContent {
            left_content: Some(Markup::text(format!("{NOT_MARKER}{}", display_value(assertion.second.as_ref())))),
            ..defaults
        },
        AssertionKind::Greater(comparison) => comparison_content(assertion, comparison, ">", defaults),
        AssertionKind::GreaterEqual(comparison) => comparison_content(assertion, comparison, ">=", defaults),
        AssertionKind::Less(comparison) => comparison_content(assertion, comparison, "<", defaults),
        AssertionKind::LessEqual(comparison) => comparison_content(assertion, comparison, "<=", defaults),
        AssertionKind::IsClose(tolerance) => tolerance_content(assertion, tolerance, defaults),
        AssertionKind::IsTrue(truth) => truth_content(truth, true, defaults),
        AssertionKind::IsFalse(truth) => truth_content(truth, false, defaults),
        AssertionKind::Contain(membership) => membership_content(membership, "in", defaults),
        AssertionKind::NotContain(membership) => membership_content(membership, "not in", defaults),
        AssertionKind::LineDiff(delta) => line_diff_content(assertion.passed, delta, defaults),
        AssertionKind::ExceptionRaised(check) | AssertionKind::ExceptionNotRaised(check) => {
            exception_content(check, defaults)
        }
        AssertionKind::EqualSlices(slices) | AssertionKind::EqualExcludeSlices(slices) => {
            slices_content(slices, defaults)
        }
        AssertionKind::DictCheck(keys) | AssertionKind::FixCheck(keys) => key_check_content(keys, defaults),
        AssertionKind::RawAssertion(raw) => raw_content(raw),
        AssertionKind::Group(_) | AssertionKind::Unrecognized => defaults,
    }
}

/// Derive content for every assertion of a testcase, flattening groups.
pub fn derive_entries(entries: &[Value]) -> Vec<DisplayContent> {
    Assertion::flatten_entries(entries).iter().map(derive_content).collect()
}

fn default_content(assertion: &Assertion) -> DisplayContent {
    DisplayContent {
        left_title: Some(Markup::text(EXPECTED_TITLE)),
        right_title: Some(Markup::text(VALUE_TITLE)),
        left_content: Some(Markup::text(display_value(assertion.second.as_ref()))),
        right_content: Some(Markup::text(display_value(assertion.first.as_ref()))),
        ..DisplayContent::default()
    }
}

fn log_content(message: &Message, defaults: DisplayContent) -> DisplayContent {
    DisplayContent {
        pre_content: Some(linkify(&display_value(message.message.as_ref()))),
        left_title: None,
        right_title: None,
        ..defaults
    }
}

/// Failed string equality highlights everything from the first differing
/// character on both sides.
fn equal_content(assertion: &Assertion, defaults: DisplayContent) -> DisplayContent {
    let (Some(Value::String(actual)), Some(Value::String(expected))) = (&assertion.first, &assertion.second) else {
        return defaults;
    };
    if assertion.passed {
        return defaults;
    }
    let position = diff_position(actual, expected);
    DisplayContent {
        left_content: Some(split_markup(expected, position)),
        right_content: Some(split_markup(actual, position)),
        ..defaults
    }
}

fn split_markup(text: &str, position: usize) -> Markup {
    let (same, different) = split_at_char(text, position);
    let mut markup = Markup::new();
    if !same.is_empty() {
        markup.push_text(same, Highlight::Plain);
    }
    if !different.is_empty() {
        markup.push_text(different, Highlight::Mismatch);
    }
    markup
}

fn comparison_content(
    assertion: &Assertion,
    comparison: &Comparison,
    fallback_label: &str,
    defaults: DisplayContent,
) -> DisplayContent {
    let label = comparison.label.as_deref().unwrap_or(fallback_label);
    DisplayContent {
        left_content: Some(Markup::text(format!(
            "value {label} {}",
            display_value(assertion.second.as_ref())
        ))),
        ..defaults
    }
}

fn tolerance_content(assertion: &Assertion, tolerance: &Tolerance, defaults: DisplayContent) -> DisplayContent {
    let label = tolerance.label.as_deref().unwrap_or("~=");
    DisplayContent {
        left_content: Some(Markup::text(format!(
            "value {label} {} (rel_tol: {}, abs_tol: {})",
            display_value(assertion.second.as_ref()),
            display_value(tolerance.rel_tol.as_ref()),
            display_value(tolerance.abs_tol.as_ref()),
        ))),
        ..defaults
    }
}

fn truth_content(truth: &Truth, expected: bool, defaults: DisplayContent) -> DisplayContent {
    DisplayContent {
        left_content: Some(Markup::text(python_bool(expected))),
        right_content: Some(Markup::text(truth_text(truth.expr.as_ref()))),
        ..defaults
    }
}

/// Booleans are shown the way the test framework prints them.
fn truth_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::Bool(flag)) => python_bool(*flag).to_string(),
        other => display_value(other),
    }
}

fn python_bool(flag: bool) -> &'static str {
    if flag { "True" } else { "False" }
}

fn membership_content(membership: &Membership, relation: &str, defaults: DisplayContent) -> DisplayContent {
    DisplayContent {
        left_content: Some(Markup::text(format!(
            "{} {relation} value",
            display_value(membership.member.as_ref())
        ))),
        right_content: Some(Markup::text(display_value(membership.container.as_ref()))),
        ..defaults
    }
}

fn line_diff_content(passed: bool, delta: &LineDelta, defaults: DisplayContent) -> DisplayContent {
    let title = if passed { "No differences." } else { "Differences:" };
    let lines = Markup(
        delta
            .delta
            .iter()
            .map(|line| Fragment::Line {
                text: line.trim_end_matches('\n').to_string(),
            })
            .collect(),
    );
    DisplayContent {
        pre_title: Some(Markup::text(title)),
        pre_content: Some(lines),
        left_title: None,
        right_title: None,
        left_content: None,
        right_content: None,
        ..defaults
    }
}

fn exception_content(check: &ExceptionCheck, defaults: DisplayContent) -> DisplayContent {
    let expected = bracketed_list(
        check
            .expected_exceptions
            .iter()
            .map(|name| (display_value(Some(name)), Highlight::Plain)),
    );
    let raised = match check.raised_exception.as_slice() {
        [] => String::new(),
        [kind] => display_value(Some(kind)),
        [kind, value, ..] => format!("{} (value: {})", display_value(Some(kind)), display_value(Some(value))),
    };
    DisplayContent {
        left_content: Some(expected),
        right_content: Some(Markup::text(raised)),
        ..defaults
    }
}

fn slices_content(slices: &SliceComparison, defaults: DisplayContent) -> DisplayContent {
    let indices = SliceIndices::from_records(&slices.data);
    DisplayContent {
        left_content: Some(classified_sequence(
            SequenceItems::from_value(slices.expected.as_ref()),
            &indices,
        )),
        right_content: Some(classified_sequence(SequenceItems::from_value(slices.actual.as_ref()), &indices)),
        ..defaults
    }
}

fn classified_sequence(sequence: SequenceItems, indices: &SliceIndices) -> Markup {
    let classified = sequence
        .items
        .into_iter()
        .enumerate()
        .map(|(index, item)| (item, indices.classify(index)));
    if sequence.is_text {
        let mut markup = Markup::new();
        for (item, highlight) in classified {
            markup.push_text(item, highlight);
        }
        markup
    } else {
        bracketed_list(classified)
    }
}

fn key_check_content(keys: &KeyCheck, defaults: DisplayContent) -> DisplayContent {
    DisplayContent {
        left_title: Some(Markup::text("Existing keys:")),
        right_title: Some(Markup::text("Absent keys:")),
        left_content: Some(flagged_list(&keys.has_keys, &keys.has_keys_diff)),
        right_content: Some(flagged_list(&keys.absent_keys, &keys.absent_keys_diff)),
        ..defaults
    }
}

fn flagged_list(keys: &[Value], diff: &[Value]) -> Markup {
    let flagged = diff::flagged_keys(diff);
    bracketed_list(keys.iter().map(|key| {
        let text = display_value(Some(key));
        let highlight = if flagged.contains(&text) { Highlight::Mismatch } else { Highlight::Plain };
        (text, highlight)
    }))
}

fn raw_content(raw: &RawContent) -> DisplayContent {
    DisplayContent {
        pre_content: Some(Markup::preformatted(display_value(raw.content.as_ref()))),
        ..DisplayContent::default()
    }
}
