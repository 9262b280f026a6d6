//! Renderer-agnostic display content derived from assertions.

use std::fmt;

use serde::Serialize;

/// Visual class of a text run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Highlight {
    #[default]
    Plain,
    /// Compared and equal.
    Match,
    /// Flagged as different, missing or unexpected.
    Mismatch,
    /// Not part of the comparison.
    Skipped,
}

/// One piece of inline markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fragment {
    Text { text: String, highlight: Highlight },
    Link { href: String },
    /// A single line whose whitespace must be kept literally.
    Line { text: String },
    Preformatted { text: String },
}

/// Ordered sequence of fragments forming one content slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Markup(pub Vec<Fragment>);

impl Markup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self(vec![Fragment::Text {
            text: text.into(),
            highlight: Highlight::Plain,
        }])
    }

    pub fn preformatted(text: impl Into<String>) -> Self {
        Self(vec![Fragment::Preformatted { text: text.into() }])
    }

    pub fn push(&mut self, fragment: Fragment) {
        self.0.push(fragment);
    }

    pub fn push_text(&mut self, text: impl Into<String>, highlight: Highlight) {
        self.0.push(Fragment::Text {
            text: text.into(),
            highlight,
        });
    }

    pub fn with_text(mut self, text: impl Into<String>, highlight: Highlight) -> Self {
        self.push_text(text, highlight);
        self
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Markup flattened to text; `Line` fragments end with a newline.
    pub fn to_plain_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Markup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for fragment in &self.0 {
            match fragment {
                Fragment::Text { text, .. } | Fragment::Preformatted { text } => f.write_str(text)?,
                Fragment::Link { href } => f.write_str(href)?,
                Fragment::Line { text } => writeln!(f, "{text}")?,
            }
        }
        Ok(())
    }
}

/// Display slots for one assertion. `None` means the slot is not rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayContent {
    pub pre_title: Option<Markup>,
    pub pre_content: Option<Markup>,
    pub left_title: Option<Markup>,
    pub right_title: Option<Markup>,
    pub left_content: Option<Markup>,
    pub right_content: Option<Markup>,
    pub post_title: Option<Markup>,
    pub post_content: Option<Markup>,
}
