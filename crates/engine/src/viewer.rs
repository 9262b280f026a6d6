//! Viewer facade tying the tree, selection, runs and polling together.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use iview_api::{ApiError, ReportBackend, ReportClient};
use iview_types::{DisplayContent, NodePath, Status};
use iview_util::ViewerConfig;
use tracing::{debug, warn};

use crate::content::derive_entries;
use crate::error::{NavigationError, RunError, SyncError, ViewerError};
use crate::poll::{PollHandle, StatusPoller};
use crate::run::{RunController, RunState};
use crate::selection::{SelectionPath, auto_select, extend_single_children, handle_nav_click, revalidate};
use crate::sync::{FetchState, TreeSynchronizer};
use crate::tree::{ReportTree, TreeStore};

#[derive(Debug, Clone)]
pub struct Viewer {
    sync: TreeSynchronizer,
    runs: RunController,
    poller: StatusPoller,
    selection: Arc<Mutex<SelectionPath>>,
    auto_expand: bool,
}

impl Viewer {
    pub fn new(backend: Arc<dyn ReportBackend>, config: &ViewerConfig) -> Self {
        let store = TreeStore::new();
        let sync = TreeSynchronizer::new(backend.clone(), store.clone());
        let runs = RunController::new(backend, store);
        let poller = StatusPoller::new(sync.clone(), config.poll_interval(), config.poll_timeout());
        Self {
            sync,
            runs,
            poller,
            selection: Arc::new(Mutex::new(SelectionPath::default())),
            auto_expand: config.auto_expand,
        }
    }

    /// Build a viewer talking HTTP to `config.api_base`.
    pub fn connect(config: &ViewerConfig) -> Result<Self, ApiError> {
        let client = ReportClient::new(&config.api_base, config.request_timeout(), config.allow_insecure)?;
        Ok(Self::new(Arc::new(client), config))
    }

    pub fn tree(&self) -> Arc<ReportTree> {
        self.sync.snapshot()
    }

    pub fn synchronizer(&self) -> &TreeSynchronizer {
        &self.sync
    }

    pub fn runs(&self) -> &RunController {
        &self.runs
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    /// Load the plan and its tests, then select along single children.
    pub async fn load(&self) -> Result<SelectionPath, SyncError> {
        let tree = self.sync.load().await?;
        let selection = self.settle(auto_select(&tree)).await;
        Ok(self.store_selection(selection))
    }

    /// Current selection, re-checked against the latest tree.
    pub fn selection(&self) -> SelectionPath {
        let tree = self.sync.snapshot();
        let mut current = self.selection.lock().expect("selection lock");
        let checked = revalidate(&current, &tree);
        if checked != *current {
            debug!(before = current.len(), after = checked.len(), "selection revalidated");
            *current = checked.clone();
        }
        checked
    }

    /// Click the node at `path`, shown at `depth` of the navigation.
    pub async fn navigate(&self, path: &NodePath, depth: usize) -> Result<SelectionPath, ViewerError> {
        let tree = self.sync.snapshot();
        let node = tree
            .get(path)
            .ok_or_else(|| NavigationError::UnknownNode { path: path.to_string() })?;
        let selection = handle_nav_click(&self.selection(), node.record(), depth)?;
        let selection = self.settle(selection).await;
        Ok(self.store_selection(selection))
    }

    /// Select the node at `path`, fetching each ancestor level as needed.
    pub async fn select_path(&self, path: &NodePath) -> Result<SelectionPath, ViewerError> {
        let mut selection = self.selection();
        for depth in 0..=path.depth() {
            let prefix = NodePath::from_segments(path.segments()[..=depth].to_vec())
                .ok_or_else(|| NavigationError::UnknownNode { path: path.to_string() })?;
            if let Some(parent) = prefix.parent() {
                self.sync.expand(&parent).await?;
            }
            let tree = self.sync.snapshot();
            let node = tree
                .get(&prefix)
                .ok_or_else(|| NavigationError::UnknownNode { path: prefix.to_string() })?;
            selection = handle_nav_click(&selection, node.record(), depth)?;
        }
        let selection = self.settle(selection).await;
        Ok(self.store_selection(selection))
    }

    pub async fn expand(&self, path: &NodePath) -> Result<(), SyncError> {
        self.sync.expand(path).await
    }

    /// Trigger a run of `path` and start polling it.
    pub async fn run(&self, path: &NodePath) -> Result<PollHandle, RunError> {
        self.runs.trigger(path).await?;
        Ok(self.poller.watch(path.clone()))
    }

    /// Trigger a run of the whole plan.
    pub async fn run_all(&self) -> Result<PollHandle, RunError> {
        let root = self
            .tree()
            .root_path()
            .cloned()
            .ok_or_else(|| RunError::UnknownNode {
                path: "<root>".to_string(),
            })?;
        self.run(&root).await
    }

    /// Display content of the selected testcase's assertions, in order.
    pub fn selected_assertions(&self) -> Vec<DisplayContent> {
        let Some(path) = self.selection().node_path() else {
            return Vec::new();
        };
        self.tree()
            .get(&path)
            .and_then(|node| node.assertions().map(derive_entries))
            .unwrap_or_default()
    }

    pub fn fetch_state(&self, path: &NodePath) -> FetchState {
        self.sync.fetch_state(path)
    }

    pub fn run_state(&self, path: &NodePath) -> Option<RunState> {
        self.runs.state(path)
    }

    /// Status shown for a node, honouring overrides.
    pub fn status_for_display(&self, path: &NodePath) -> Option<Status> {
        self.tree().get(path).map(|node| node.record().display_status())
    }

    pub fn shutdown(&self) {
        self.poller.shutdown();
    }

    /// Extend a selection through single children, fetching unfetched
    /// levels on the way when auto-expansion is enabled.
    async fn settle(&self, mut selection: SelectionPath) -> SelectionPath {
        let mut attempted = HashSet::new();
        loop {
            let tree = self.sync.snapshot();
            selection = extend_single_children(&tree, selection);
            let Some(path) = selection.node_path() else {
                return selection;
            };
            let needs_fetch = tree
                .get(&path)
                .is_some_and(|node| !node.is_fetched() && (node.is_testcase() || node.may_have_children()));
            if !self.auto_expand || !needs_fetch || !attempted.insert(path.clone()) {
                return selection;
            }
            if let Err(error) = self.sync.expand(&path).await {
                warn!(node = %path, %error, "auto-expansion stopped");
                return selection;
            }
        }
    }

    fn store_selection(&self, selection: SelectionPath) -> SelectionPath {
        *self.selection.lock().expect("selection lock") = selection.clone();
        selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::PollOutcome;
    use crate::testing::{MockBackend, chain_backend, sample_backend, testcase};
    use serde_json::json;

    fn path(segments: &[&str]) -> NodePath {
        NodePath::from_segments(segments.iter().map(|segment| segment.to_string()).collect()).unwrap()
    }

    fn viewer(backend: MockBackend, auto_expand: bool) -> (Arc<MockBackend>, Viewer) {
        let backend = Arc::new(backend);
        let config = ViewerConfig {
            auto_expand,
            poll_interval_ms: 100,
            ..ViewerConfig::default()
        };
        (backend.clone(), Viewer::new(backend, &config))
    }

    fn uids(selection: &SelectionPath) -> Vec<&str> {
        selection.entries().iter().map(|entry| entry.uid.as_str()).collect()
    }

    #[tokio::test]
    async fn load_follows_a_single_chain_to_the_testcase() {
        let backend = chain_backend();
        backend.insert(testcase(
            "C",
            &["P", "T", "S"],
            vec![json!({"type": "Equal", "passed": false, "first": "hello", "second": "hexlo"})],
        ));
        let (_backend, viewer) = viewer(backend, true);

        let selection = viewer.load().await.unwrap();

        assert_eq!(uids(&selection), vec!["P", "T", "S", "C"]);
        let contents = viewer.selected_assertions();
        assert_eq!(contents.len(), 1);
        assert_eq!(
            contents[0].left_content.as_ref().unwrap().to_plain_text(),
            "hexlo"
        );
    }

    #[tokio::test]
    async fn load_without_auto_expand_stops_at_unfetched_level() {
        let (backend, viewer) = viewer(chain_backend(), false);
        let selection = viewer.load().await.unwrap();
        assert_eq!(uids(&selection), vec!["P", "T"]);
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn branching_plan_keeps_root_selected() {
        let (_backend, viewer) = viewer(sample_backend(), true);
        let selection = viewer.load().await.unwrap();
        assert_eq!(uids(&selection), vec!["P"]);
        assert!(viewer.selected_assertions().is_empty());
    }

    #[tokio::test]
    async fn clicking_a_test_expands_it() {
        let (_backend, viewer) = viewer(sample_backend(), true);
        viewer.load().await.unwrap();

        let selection = viewer.navigate(&path(&["P", "T2"]), 1).await.unwrap();
        assert_eq!(uids(&selection), vec!["P", "T2", "S2", "C3"]);
    }

    #[tokio::test]
    async fn selecting_a_deep_path_fetches_ancestors() {
        let (backend, viewer) = viewer(sample_backend(), false);
        viewer.load().await.unwrap();

        let selection = viewer.select_path(&path(&["P", "T1", "S1", "C2"])).await.unwrap();
        assert_eq!(uids(&selection), vec!["P", "T1", "S1", "C2"]);
        assert_eq!(backend.count("GET /report/tests/T1/suites"), 1);
        assert_eq!(backend.count("GET /report/tests/T1/suites/S1/testcases"), 1);
    }

    #[tokio::test]
    async fn clicking_an_unknown_node_fails() {
        let (_backend, viewer) = viewer(sample_backend(), true);
        viewer.load().await.unwrap();
        let error = viewer.navigate(&path(&["P", "Nope"]), 1).await.unwrap_err();
        assert!(matches!(error, ViewerError::Navigation(NavigationError::UnknownNode { .. })));
    }

    #[tokio::test]
    async fn selection_is_truncated_when_nodes_vanish() {
        let (backend, viewer) = viewer(sample_backend(), true);
        viewer.load().await.unwrap();
        viewer.navigate(&path(&["P", "T1"]), 1).await.unwrap();

        backend.remove("/report/tests/T1");
        viewer.synchronizer().refresh(&path(&["P"])).await.unwrap();

        assert_eq!(uids(&viewer.selection()), vec!["P", "T2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_until_terminal() {
        let (backend, viewer) = viewer(chain_backend(), true);
        viewer.load().await.unwrap();
        backend.script_statuses("/report/tests/T", &[Status::Running, Status::Passed]);

        let handle = viewer.run(&path(&["P", "T"])).await.unwrap();
        assert_eq!(viewer.status_for_display(&path(&["P", "T"])), Some(Status::Running));
        assert_eq!(handle.finished().await, PollOutcome::Terminal(Status::Passed));
        assert_eq!(viewer.status_for_display(&path(&["P", "T"])), Some(Status::Passed));
        assert_eq!(backend.count("PUT /report/tests/T"), 1);
    }

    #[tokio::test]
    async fn failed_run_reports_error_without_polling() {
        let (backend, viewer) = viewer(sample_backend(), true);
        viewer.load().await.unwrap();
        backend.fail("/report", 500);

        let error = viewer.run_all().await.unwrap_err();
        assert!(matches!(error, RunError::RunTriggerFailure { .. }));
        assert_eq!(viewer.poller().active_count(), 0);
        assert_eq!(viewer.status_for_display(&path(&["P"])), Some(Status::Ready));
    }

    #[tokio::test]
    async fn run_of_a_selected_suite_without_auto_expand() {
        let (backend, viewer) = viewer(sample_backend(), false);
        viewer.load().await.unwrap();
        let suite = path(&["P", "T1", "S1"]);

        let selection = viewer.select_path(&suite).await.unwrap();
        assert_eq!(uids(&selection), vec!["P", "T1", "S1"]);
        let handle = viewer.run(&suite).await.unwrap();

        assert_eq!(handle.path(), &suite);
        assert_eq!(backend.count("PUT /report/tests/T1/suites/S1"), 1);
        assert_eq!(viewer.status_for_display(&suite), Some(Status::Running));
        viewer.shutdown();
    }

    #[tokio::test]
    async fn run_of_an_unfetched_node_is_refused() {
        let (backend, viewer) = viewer(sample_backend(), false);
        viewer.load().await.unwrap();
        viewer.select_path(&path(&["P", "T1"])).await.unwrap();

        let error = viewer.run(&path(&["P", "T1", "S1"])).await.unwrap_err();
        assert!(matches!(error, RunError::UnknownNode { .. }));
        assert_eq!(backend.count("PUT /report/tests/T1/suites/S1"), 0);
    }
}
