//! Typed view over the assertion records found in a testcase's `entries`.
//!
//! Records arrive as loose JSON objects discriminated by their `type` field.
//! [`Assertion::from_value`] is total: a record whose type is unknown, or
//! whose type-specific fields do not have the expected shape, becomes
//! [`AssertionKind::Unrecognized`] and is displayed with default content.
//!
//! Field naming follows the backend: `first` holds the actual value and
//! `second` the expected one.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// One recorded check inside a testcase.
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    /// Raw `type` discriminator as sent by the backend.
    pub type_name: String,
    pub passed: bool,
    /// Actual value.
    pub first: Option<Value>,
    /// Expected value.
    pub second: Option<Value>,
    pub description: Option<String>,
    pub kind: AssertionKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssertionKind {
    Log(Message),
    Fail(Message),
    Equal,
    NotEqual,
    Greater(Comparison),
    GreaterEqual(Comparison),
    Less(Comparison),
    LessEqual(Comparison),
    IsClose(Tolerance),
    IsTrue(Truth),
    IsFalse(Truth),
    Contain(Membership),
    NotContain(Membership),
    LineDiff(LineDelta),
    ExceptionRaised(ExceptionCheck),
    ExceptionNotRaised(ExceptionCheck),
    EqualSlices(SliceComparison),
    EqualExcludeSlices(SliceComparison),
    DictCheck(KeyCheck),
    FixCheck(KeyCheck),
    RawAssertion(RawContent),
    Group(Vec<Assertion>),
    Unrecognized,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Comparison {
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Tolerance {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub rel_tol: Option<Value>,
    #[serde(default)]
    pub abs_tol: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Truth {
    #[serde(default)]
    pub expr: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Membership {
    #[serde(default)]
    pub member: Option<Value>,
    #[serde(default)]
    pub container: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LineDelta {
    #[serde(default)]
    pub delta: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExceptionCheck {
    #[serde(default)]
    pub expected_exceptions: Vec<Value>,
    /// `[type_name, value]` of the exception actually raised.
    #[serde(default)]
    pub raised_exception: Vec<Value>,
}

/// Slice comparison result.
///
/// Every `data` line-record is `[slice, compared_indices, mismatch_indices, ...]`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SliceComparison {
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
    #[serde(default)]
    pub expected: Option<Value>,
    #[serde(default)]
    pub actual: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KeyCheck {
    #[serde(default)]
    pub has_keys: Vec<Value>,
    #[serde(default)]
    pub absent_keys: Vec<Value>,
    #[serde(default)]
    pub has_keys_diff: Vec<Value>,
    #[serde(default)]
    pub absent_keys_diff: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawContent {
    #[serde(default)]
    pub content: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct GroupEntries {
    #[serde(default)]
    entries: Vec<Value>,
}

fn fields<T: DeserializeOwned>(value: &Value) -> Option<T> {
    serde_json::from_value(value.clone()).ok()
}

/// A single top-level field; absent, `null` and badly shaped values are `None`.
fn field<T: DeserializeOwned>(value: &Value, name: &str) -> Option<T> {
    value.get(name).filter(|field| !field.is_null()).and_then(fields)
}

impl Assertion {
    /// Interpret a raw assertion record.
    pub fn from_value(value: &Value) -> Self {
        let type_name: String = field(value, "type").unwrap_or_default();
        let kind = AssertionKind::parse(&type_name, value);
        Self {
            kind,
            type_name,
            passed: field(value, "passed").unwrap_or(true),
            first: field(value, "first"),
            second: field(value, "second"),
            description: field(value, "description"),
        }
    }

    /// Interpret a testcase's entries, expanding `Group` records into their
    /// members in order.
    pub fn flatten_entries(entries: &[Value]) -> Vec<Assertion> {
        let mut flattened = Vec::with_capacity(entries.len());
        for entry in entries {
            push_flattened(Assertion::from_value(entry), &mut flattened);
        }
        flattened
    }
}

fn push_flattened(assertion: Assertion, out: &mut Vec<Assertion>) {
    match assertion.kind {
        AssertionKind::Group(members) => {
            for member in members {
                push_flattened(member, out);
            }
        }
        _ => out.push(assertion),
    }
}

impl AssertionKind {
    fn parse(type_name: &str, value: &Value) -> Self {
        let parsed = match type_name {
            "Log" => fields(value).map(AssertionKind::Log),
            "Fail" => fields(value).map(AssertionKind::Fail),
            "Equal" => Some(AssertionKind::Equal),
            "NotEqual" => Some(AssertionKind::NotEqual),
            "Greater" => fields(value).map(AssertionKind::Greater),
            "GreaterEqual" => fields(value).map(AssertionKind::GreaterEqual),
            "Less" => fields(value).map(AssertionKind::Less),
            "LessEqual" => fields(value).map(AssertionKind::LessEqual),
            "IsClose" => fields(value).map(AssertionKind::IsClose),
            "IsTrue" => fields(value).map(AssertionKind::IsTrue),
            "IsFalse" => fields(value).map(AssertionKind::IsFalse),
            "Contain" => fields(value).map(AssertionKind::Contain),
            "NotContain" => fields(value).map(AssertionKind::NotContain),
            "LineDiff" => fields(value).map(AssertionKind::LineDiff),
            "ExceptionRaised" => fields(value).map(AssertionKind::ExceptionRaised),
            "ExceptionNotRaised" => fields(value).map(AssertionKind::ExceptionNotRaised),
            "EqualSlices" => fields(value).map(AssertionKind::EqualSlices),
            "EqualExcludeSlices" => fields(value).map(AssertionKind::EqualExcludeSlices),
            "DictCheck" => fields(value).map(AssertionKind::DictCheck),
            "FixCheck" => fields(value).map(AssertionKind::FixCheck),
            "RawAssertion" => fields(value).map(AssertionKind::RawAssertion),
            "Group" => fields::<GroupEntries>(value)
                .map(|group| AssertionKind::Group(group.entries.iter().map(Assertion::from_value).collect())),
            _ => None,
        };
        parsed.unwrap_or(AssertionKind::Unrecognized)
    }
}
