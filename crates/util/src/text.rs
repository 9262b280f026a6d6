//! Text helpers used when preparing display content.

use iview_types::{Fragment, Highlight, Markup};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("valid url pattern"));

/// Punctuation that ends a sentence rather than a URL.
const URL_TRAILING: [char; 7] = ['.', ',', ';', ':', ')', '!', '?'];

/// String form of an optional value; absent and `null` render as "".
///
/// Strings are shown without quotes, every other value as compact JSON.
pub fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// Split `text` into plain runs and clickable links for every bare
/// `http://` or `https://` substring. Trailing sentence punctuation stays
/// in the text.
pub fn linkify(text: &str) -> Markup {
    let mut markup = Markup::new();
    let mut cursor = 0;
    for found in URL_PATTERN.find_iter(text) {
        let href = found.as_str().trim_end_matches(URL_TRAILING);
        if href.ends_with("://") {
            continue;
        }
        if found.start() > cursor {
            markup.push_text(&text[cursor..found.start()], Highlight::Plain);
        }
        markup.push(Fragment::Link { href: href.to_string() });
        cursor = found.start() + href.len();
    }
    if cursor < text.len() || markup.is_empty() {
        markup.push_text(&text[cursor..], Highlight::Plain);
    }
    markup
}

/// Bracketed, comma-joined list where each item carries its own highlight.
pub fn bracketed_list<I>(items: I) -> Markup
where
    I: IntoIterator<Item = (String, Highlight)>,
{
    let mut markup = Markup::text("[");
    for (index, (text, highlight)) in items.into_iter().enumerate() {
        if index > 0 {
            markup.push_text(", ", Highlight::Plain);
        }
        markup.push_text(text, highlight);
    }
    markup.push_text("]", Highlight::Plain);
    markup
}
