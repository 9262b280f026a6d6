//! Error types for tree synchronization, navigation and run triggering.
//!
//! Network-layer failures are converted into these node-local errors at the
//! synchronizer/controller boundary; nothing here is fatal for the viewer.

use iview_api::ApiError;
use iview_types::NodePath;
use thiserror::Error;

/// Structural problems detected while merging fresh records into the tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("node not found in tree: {path}")]
    UnknownNode { path: NodePath },

    #[error("inconsistent record under {path}: {reason}")]
    Inconsistent { path: NodePath, reason: String },
}

impl TreeError {
    pub fn inconsistent(path: &NodePath, reason: impl Into<String>) -> Self {
        Self::Inconsistent {
            path: path.clone(),
            reason: reason.into(),
        }
    }
}

/// Outcome of a failed fetch. Cloneable so that one pending fetch can hand
/// the same result to every waiter.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Transport failure or non-2xx response; the node stays unfetched.
    #[error("fetch failed for {path}: {source}")]
    FetchFailure { path: String, source: ApiError },

    /// Payload missing required fields or inconsistent with the tree; the
    /// merge is aborted and the previous tree is kept.
    #[error("malformed response for {path}: {reason}")]
    MalformedResponse { path: String, reason: String },

    #[error("node not found in tree: {path}")]
    UnknownNode { path: String },
}

impl SyncError {
    pub fn from_api(path: impl Into<String>, error: ApiError) -> Self {
        let path = path.into();
        match error {
            ApiError::Malformed { reason, .. } => Self::MalformedResponse { path, reason },
            ApiError::UnsupportedDepth { .. } => Self::MalformedResponse {
                path,
                reason: error.to_string(),
            },
            other => Self::FetchFailure { path, source: other },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FetchFailure { .. })
    }
}

impl From<TreeError> for SyncError {
    fn from(error: TreeError) -> Self {
        match error {
            TreeError::UnknownNode { path } => Self::UnknownNode { path: path.to_string() },
            TreeError::Inconsistent { path, reason } => Self::MalformedResponse {
                path: path.to_string(),
                reason,
            },
        }
    }
}

/// Failures of the run-trigger protocol.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    /// The trigger request failed; the optimistic status was reverted.
    #[error("run trigger failed for {path}: {source}")]
    RunTriggerFailure { path: String, source: ApiError },

    #[error("a run trigger is already pending for {path}")]
    AlreadyPending { path: String },

    #[error("node not found in tree: {path}")]
    UnknownNode { path: String },
}

/// Rejected navigation clicks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NavigationError {
    #[error("click depth {depth} exceeds selection length {length}")]
    DepthOutOfRange { depth: usize, length: usize },

    #[error("node '{uid}' clicked at depth 0 is not the plan root")]
    NotRoot { uid: String },

    #[error("node '{uid}' is not a child of the selection at depth {depth}")]
    NotAChild { uid: String, depth: usize },

    #[error("node not found in tree: {path}")]
    UnknownNode { path: String },
}

/// Errors surfaced by the viewer facade.
#[derive(Debug, Clone, Error)]
pub enum ViewerError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error(transparent)]
    Run(#[from] RunError),
}
