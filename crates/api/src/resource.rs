//! Addressing of report resources on the interactive API.
//!
//! The backend exposes a fixed hierarchy:
//!
//! ```text
//! report
//! report/tests/{test}
//! report/tests/{test}/suites/{suite}
//! report/tests/{test}/suites/{suite}/testcases/{testcase}
//! ```
//!
//! A node's resource is derived from its ancestry; the first ancestor is the
//! plan itself and is not part of the URL.

use std::fmt;

use iview_types::{NodePath, ReportNode};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use crate::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourcePath {
    Report,
    Test { test: String },
    Suite { test: String, suite: String },
    Testcase { test: String, suite: String, testcase: String },
}

impl ResourcePath {
    /// Resolve the resource of the node whose ancestors are `parent_uids`.
    pub fn from_ancestry(parent_uids: &[String], uid: &str) -> Result<Self, ApiError> {
        match parent_uids {
            [] => Ok(Self::Report),
            [_plan] => Ok(Self::Test { test: uid.to_string() }),
            [_plan, test] => Ok(Self::Suite {
                test: test.clone(),
                suite: uid.to_string(),
            }),
            [_plan, test, suite] => Ok(Self::Testcase {
                test: test.clone(),
                suite: suite.clone(),
                testcase: uid.to_string(),
            }),
            _ => Err(ApiError::UnsupportedDepth {
                depth: parent_uids.len(),
                uid: uid.to_string(),
            }),
        }
    }

    pub fn for_node(node: &ReportNode) -> Result<Self, ApiError> {
        Self::from_ancestry(&node.parent_uids, &node.uid)
    }

    pub fn for_path(path: &NodePath) -> Result<Self, ApiError> {
        Self::from_ancestry(path.ancestors(), path.uid())
    }

    /// Relative URL of this single resource.
    pub fn url_path(&self) -> String {
        match self {
            Self::Report => "/report".to_string(),
            Self::Test { test } => format!("/report/tests/{}", encode(test)),
            Self::Suite { test, suite } => format!("/report/tests/{}/suites/{}", encode(test), encode(suite)),
            Self::Testcase { test, suite, testcase } => format!(
                "/report/tests/{}/suites/{}/testcases/{}",
                encode(test),
                encode(suite),
                encode(testcase)
            ),
        }
    }

    /// Relative URL of the list resource holding this resource's children.
    ///
    /// Testcases have no child listing; their assertions arrive inline.
    pub fn children_url_path(&self) -> Option<String> {
        match self {
            Self::Report => Some("/report/tests".to_string()),
            Self::Test { .. } => Some(format!("{}/suites", self.url_path())),
            Self::Suite { .. } => Some(format!("{}/testcases", self.url_path())),
            Self::Testcase { .. } => None,
        }
    }

    /// Zero for the plan, three for a testcase.
    pub fn depth(&self) -> usize {
        match self {
            Self::Report => 0,
            Self::Test { .. } => 1,
            Self::Suite { .. } => 2,
            Self::Testcase { .. } => 3,
        }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url_path())
    }
}

fn encode(segment: &str) -> String {
    utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string()
}
