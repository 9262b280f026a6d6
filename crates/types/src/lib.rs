//! Shared types for the interactive report viewer.
//!
//! - [`report`]: node records and statuses as served by the backend
//! - [`assertion`]: typed interpretation of assertion records
//! - [`content`]: display content produced from assertions

pub mod assertion;
pub mod content;
pub mod report;

pub use assertion::{
    Assertion, AssertionKind, Comparison, ExceptionCheck, KeyCheck, LineDelta, Membership, Message, RawContent,
    SliceComparison, Tolerance, Truth,
};
pub use content::{DisplayContent, Fragment, Highlight, Markup};
pub use report::{Category, NodeKind, NodePath, ReportNode, Status};
