//! Difference helpers used when highlighting assertion operands.

use std::collections::HashSet;

use iview_types::Highlight;
use iview_util::display_value;
use serde_json::Value;

/// Char index of the first position where `left` and `right` differ, or the
/// shorter length when one is a prefix of the other.
pub fn diff_position(left: &str, right: &str) -> usize {
    left.chars().zip(right.chars()).take_while(|(a, b)| a == b).count()
}

/// Split `text` before its `index`-th char.
pub fn split_at_char(text: &str, index: usize) -> (&str, &str) {
    let offset = text.char_indices().nth(index).map_or(text.len(), |(offset, _)| offset);
    text.split_at(offset)
}

/// Indices compared and indices found different, collected over every
/// line-record of a slice comparison.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SliceIndices {
    pub compared: HashSet<usize>,
    pub mismatched: HashSet<usize>,
}

impl SliceIndices {
    pub fn from_records(records: &[Vec<Value>]) -> Self {
        let mut indices = SliceIndices::default();
        for record in records {
            indices.compared.extend(index_list(record.get(1)));
            indices.mismatched.extend(index_list(record.get(2)));
        }
        indices
    }

    /// Mismatch wins over match, which wins over not compared.
    pub fn classify(&self, index: usize) -> Highlight {
        if self.mismatched.contains(&index) {
            Highlight::Mismatch
        } else if self.compared.contains(&index) {
            Highlight::Match
        } else {
            Highlight::Skipped
        }
    }
}

fn index_list(value: Option<&Value>) -> impl Iterator<Item = usize> + '_ {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_u64)
        .filter_map(|index| usize::try_from(index).ok())
}

/// Elements of a compared sequence and whether they are single characters
/// of a string.
#[derive(Debug, PartialEq, Eq)]
pub struct SequenceItems {
    pub items: Vec<String>,
    pub is_text: bool,
}

impl SequenceItems {
    /// Strings, and sequences holding a single string, are split into their
    /// characters; other arrays keep one item per element.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(text)) => Self::chars(text),
            Some(Value::Array(elements)) => match elements.as_slice() {
                [Value::String(text)] => Self::chars(text),
                _ => Self {
                    items: elements.iter().map(|element| display_value(Some(element))).collect(),
                    is_text: false,
                },
            },
            None | Some(Value::Null) => Self {
                items: Vec::new(),
                is_text: false,
            },
            Some(other) => Self {
                items: vec![display_value(Some(other))],
                is_text: false,
            },
        }
    }

    fn chars(text: &str) -> Self {
        Self {
            items: text.chars().map(String::from).collect(),
            is_text: true,
        }
    }
}

/// Items flagged as differing, keyed by their display form.
pub fn flagged_keys(diff: &[Value]) -> HashSet<String> {
    diff.iter().map(|key| display_value(Some(key))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_position_finds_first_difference() {
        assert_eq!(diff_position("hello", "hexlo"), 2);
        assert_eq!(diff_position("abc", "abc"), 3);
        assert_eq!(diff_position("ab", "abc"), 2);
        assert_eq!(diff_position("", "x"), 0);
    }

    #[test]
    fn split_respects_char_boundaries() {
        assert_eq!(split_at_char("héllo", 2), ("hé", "llo"));
        assert_eq!(split_at_char("ab", 5), ("ab", ""));
    }

    #[test]
    fn slice_classification_prefers_mismatch() {
        let indices = SliceIndices::from_records(&[vec![json!("abc"), json!([0, 1]), json!([1])]]);
        assert_eq!(indices.classify(0), Highlight::Match);
        assert_eq!(indices.classify(1), Highlight::Mismatch);
        assert_eq!(indices.classify(2), Highlight::Skipped);
    }

    #[test]
    fn malformed_index_lists_are_ignored() {
        let indices = SliceIndices::from_records(&[vec![json!("x"), json!("not a list")], vec![]]);
        assert!(indices.compared.is_empty());
        assert!(indices.mismatched.is_empty());
    }

    #[test]
    fn single_string_sequences_become_characters() {
        let items = SequenceItems::from_value(Some(&json!(["abx"])));
        assert!(items.is_text);
        assert_eq!(items.items, vec!["a", "b", "x"]);

        let items = SequenceItems::from_value(Some(&json!([1, 2])));
        assert!(!items.is_text);
        assert_eq!(items.items, vec!["1", "2"]);
    }
}
