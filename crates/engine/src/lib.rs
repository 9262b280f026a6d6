//! # iview Engine
//!
//! Client engine of the interactive test-report viewer. The backend executes
//! a test plan and serves its report tree one level at a time; the engine
//! mirrors that tree, decides what is selected and shown, and drives runs.
//!
//! ## Key Features
//!
//! - **Lazy tree sync**: plan and tests load up front, deeper levels on
//!   expansion, with concurrent requests for the same level sharing one fetch
//! - **Navigation**: automatic selection along single-child chains and
//!   click handling that truncates and extends the selection
//! - **Runs**: optimistic `running` status, confirmed or reverted by the
//!   backend's answer, followed by cancellable status polling
//! - **Assertion content**: pure derivation of renderer-agnostic display slots
//!   from assertion records
//!
//! ## Usage
//!
//! ```rust,no_run
//! use iview_engine::Viewer;
//! use iview_util::ViewerConfig;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let viewer = Viewer::connect(&ViewerConfig::default())?;
//! let selection = viewer.load().await?;
//! for content in viewer.selected_assertions() {
//!     println!("{content:?}");
//! }
//! println!("selected {} levels", selection.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`tree`**: immutable tree snapshots and the merge rules
//! - **`sync`**: fetching and the in-flight fetch ledger
//! - **`selection`**: selection paths and navigation
//! - **`run`** / **`poll`**: run triggering and status polling
//! - **`content`**: assertion display content
//! - **`viewer`**: facade used by front ends

pub mod content;
pub mod error;
pub mod poll;
pub mod run;
pub mod selection;
pub mod sync;
pub mod tree;
pub mod viewer;

#[cfg(test)]
pub(crate) mod testing;

pub use content::{derive_content, derive_entries};
pub use error::{NavigationError, RunError, SyncError, TreeError, ViewerError};
pub use poll::{PollHandle, PollOutcome, StatusPoller};
pub use run::{RunController, RunState};
pub use selection::{SelectionEntry, SelectionPath, auto_select, handle_nav_click, revalidate};
pub use sync::{FetchLevel, FetchState, TreeSynchronizer};
pub use tree::{ReportTree, TreeNode, TreeStore};
pub use viewer::Viewer;
