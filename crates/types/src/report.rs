//! Report tree records as served by the interactive backend.
//!
//! The backend exposes the execution tree one level at a time. Plan, test and
//! suite records are *shallow*: they list their children by uid in
//! `entry_uids` and omit `entries`. Testcase records are fully serialized and
//! carry their assertion records in `entries`.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Execution status of a report node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Ready,
    Waiting,
    Running,
    Resetting,
    Passed,
    Failed,
    Error,
    Incomplete,
    Skipped,
    #[serde(rename = "xfail")]
    XFail,
    #[serde(rename = "xpass")]
    XPass,
    #[serde(rename = "xpass_strict")]
    XPassStrict,
    Unstable,
    #[serde(other)]
    Unknown,
}

impl Status {
    /// Whether execution has settled on an outcome.
    ///
    /// `Ready` is not terminal: it describes a node that has not run yet.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Ready | Status::Waiting | Status::Running | Status::Resetting)
    }

    /// Whether the status counts as a successful outcome.
    pub fn is_successful(&self) -> bool {
        matches!(self, Status::Passed | Status::Skipped | Status::XFail | Status::XPass)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ready => "ready",
            Status::Waiting => "waiting",
            Status::Running => "running",
            Status::Resetting => "resetting",
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Error => "error",
            Status::Incomplete => "incomplete",
            Status::Skipped => "skipped",
            Status::XFail => "xfail",
            Status::XPass => "xpass",
            Status::XPassStrict => "xpass_strict",
            Status::Unstable => "unstable",
            Status::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural type of a report node (the `type` field on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    #[serde(rename = "testplan", alias = "TestReport")]
    Testplan,
    #[serde(rename = "TestGroupReport")]
    TestGroup,
    #[serde(rename = "TestCaseReport")]
    TestCase,
}

/// Finer-grained display tag of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Testplan,
    #[serde(alias = "MultiTest")]
    Multitest,
    Suite,
    Parametrization,
    Testcase,
    #[serde(other)]
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Testplan => "testplan",
            Category::Multitest => "multitest",
            Category::Suite => "suite",
            Category::Parametrization => "parametrization",
            Category::Testcase => "testcase",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single node record of the execution tree.
///
/// `entries` keeps the wire distinction between "absent" (not fetched or not
/// included in a shallow listing) and an empty array (fetched, no children).
/// Metadata the viewer does not interpret (`logs`, `tags`, `timer`,
/// `attachments`, `description`, ...) is carried through in `meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportNode {
    pub uid: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent_uids: Vec<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_override: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_uids: Option<Vec<String>>,
    #[serde(flatten)]
    pub meta: IndexMap<String, Value>,
}

impl ReportNode {
    /// Category used for display and selection, falling back on the node kind
    /// when the backend omits it.
    pub fn category(&self) -> Category {
        self.category.unwrap_or(match self.kind {
            NodeKind::Testplan => Category::Testplan,
            NodeKind::TestGroup => Category::Multitest,
            NodeKind::TestCase => Category::Testcase,
        })
    }

    /// Status shown to the user; `status_override` wins when present.
    pub fn display_status(&self) -> Status {
        self.status_override.unwrap_or(self.status)
    }

    /// Full address of this node: ancestors followed by its own uid.
    pub fn path(&self) -> NodePath {
        NodePath::from_ancestry(&self.parent_uids, &self.uid)
    }

    /// Copy of the scalar part of the record with child content stripped.
    pub fn shallow(&self) -> ReportNode {
        ReportNode {
            entries: None,
            ..self.clone()
        }
    }
}

/// Ordered chain of uids from the root to a node.
///
/// Uids are only unique among siblings, so the full chain is the node's
/// identity inside a tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodePath(Vec<String>);

impl NodePath {
    pub fn root(uid: impl Into<String>) -> Self {
        Self(vec![uid.into()])
    }

    pub fn from_ancestry(parent_uids: &[String], uid: &str) -> Self {
        let mut segments = Vec::with_capacity(parent_uids.len() + 1);
        segments.extend(parent_uids.iter().cloned());
        segments.push(uid.to_string());
        Self(segments)
    }

    pub fn from_segments(segments: Vec<String>) -> Option<Self> {
        if segments.is_empty() { None } else { Some(Self(segments)) }
    }

    pub fn child(&self, uid: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(uid.into());
        Self(segments)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn uid(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// Uids of every ancestor, root first.
    pub fn ancestors(&self) -> &[String] {
        &self.0[..self.0.len().saturating_sub(1)]
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Zero for the root.
    pub fn depth(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    pub fn starts_with(&self, prefix: &NodePath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}
