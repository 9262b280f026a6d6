//! Lazy fetching of the report tree.
//!
//! The plan skeleton and its tests are loaded up front; deeper levels are
//! fetched when a node is expanded. Every fetch is registered in an
//! in-flight ledger keyed by node and level, so concurrent requests for the
//! same content share one network call and one merge. Forced refreshes only
//! join fetches started since the last [`TreeSynchronizer::mark_stale`], and a
//! fetch overtaken by a newer one for the same key drops its result.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use iview_api::{ReportBackend, ResourcePath};
use iview_types::{NodePath, Status};
use tracing::{debug, info, warn};

use crate::error::{SyncError, TreeError};
use crate::tree::{ReportTree, TreeStore};

type SharedFetch = Shared<BoxFuture<'static, Result<(), SyncError>>>;

/// Tree level a fetch fills in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchLevel {
    Plan,
    Tests,
    Suites,
    Testcases,
    Assertions,
}

impl FetchLevel {
    /// Level fetched when expanding the node at `path`.
    fn below(path: &NodePath) -> Self {
        match path.depth() {
            0 => FetchLevel::Tests,
            1 => FetchLevel::Suites,
            2 => FetchLevel::Testcases,
            _ => FetchLevel::Assertions,
        }
    }
}

impl fmt::Display for FetchLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FetchLevel::Plan => "plan",
            FetchLevel::Tests => "tests",
            FetchLevel::Suites => "suites",
            FetchLevel::Testcases => "testcases",
            FetchLevel::Assertions => "assertions",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FetchKey {
    Skeleton,
    Below { node: NodePath, level: FetchLevel },
}

impl FetchKey {
    fn below(node: &NodePath) -> Self {
        FetchKey::Below {
            node: node.clone(),
            level: FetchLevel::below(node),
        }
    }
}

struct PendingFetch {
    id: u64,
    generation: u64,
    fetch: SharedFetch,
}

/// Per-node fetch status as seen by the UI.
#[derive(Debug, Clone)]
pub enum FetchState {
    Unfetched,
    InFlight,
    Fetched,
    /// Last fetch failed; the node stays expandable and may be retried.
    Failed(SyncError),
}

/// Keeps a [`TreeStore`] in sync with the backend.
#[derive(Clone)]
pub struct TreeSynchronizer {
    backend: Arc<dyn ReportBackend>,
    store: TreeStore,
    in_flight: Arc<Mutex<HashMap<FetchKey, PendingFetch>>>,
    /// Id of the newest fetch started for each key.
    latest: Arc<Mutex<HashMap<FetchKey, u64>>>,
    failures: Arc<Mutex<HashMap<NodePath, SyncError>>>,
    next_id: Arc<AtomicU64>,
    generation: Arc<AtomicU64>,
}

impl fmt::Debug for TreeSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeSynchronizer")
            .field("store", &self.store)
            .field("in_flight", &self.in_flight.lock().expect("in-flight lock").len())
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}

impl TreeSynchronizer {
    pub fn new(backend: Arc<dyn ReportBackend>, store: TreeStore) -> Self {
        Self {
            backend,
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            latest: Arc::new(Mutex::new(HashMap::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn store(&self) -> &TreeStore {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn ReportBackend> {
        &self.backend
    }

    pub fn snapshot(&self) -> Arc<ReportTree> {
        self.store.snapshot()
    }

    /// Load the plan record followed by its tests.
    pub async fn load(&self) -> Result<Arc<ReportTree>, SyncError> {
        self.load_skeleton().await?;
        let tree = self.snapshot();
        let root = tree.root_path().cloned().ok_or_else(|| SyncError::UnknownNode {
            path: "<root>".to_string(),
        })?;
        self.expand(&root).await?;
        Ok(self.snapshot())
    }

    /// Fetch the plan record and merge it at the root.
    pub async fn load_skeleton(&self) -> Result<(), SyncError> {
        self.join_or_start(FetchKey::Skeleton, None, 0).await
    }

    /// Note that the backend has changed, e.g. a run finished. Refreshes
    /// issued afterwards start a new request instead of joining one already
    /// in flight.
    pub fn mark_stale(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(generation, "backend state marked stale");
    }

    /// Fetch the content below `path` unless it is already known.
    pub async fn expand(&self, path: &NodePath) -> Result<(), SyncError> {
        let tree = self.snapshot();
        let node = tree.get(path).ok_or_else(|| SyncError::UnknownNode {
            path: path.to_string(),
        })?;
        if node.is_fetched() {
            return Ok(());
        }
        self.join_or_start(FetchKey::below(path), Some(path.clone()), 0).await
    }

    /// Fetch the content below `path` again, even if already known.
    pub async fn refresh(&self, path: &NodePath) -> Result<(), SyncError> {
        if !self.snapshot().contains(path) {
            return Err(SyncError::UnknownNode { path: path.to_string() });
        }
        let generation = self.generation.load(Ordering::Acquire);
        self.join_or_start(FetchKey::below(path), Some(path.clone()), generation).await
    }

    /// Retry a node whose last fetch failed.
    pub async fn retry(&self, path: &NodePath) -> Result<(), SyncError> {
        self.expand(path).await
    }

    /// Refresh `path` and every fetched group below it, parents first.
    pub async fn refresh_subtree(&self, path: &NodePath) -> Result<(), SyncError> {
        let mut pending = vec![path.clone()];
        while let Some(current) = pending.pop() {
            let Some(node) = self.snapshot().get(&current).cloned() else {
                continue;
            };
            if !node.is_fetched() {
                continue;
            }
            self.refresh(&current).await?;
            if let Some(children) = self.snapshot().children(&current) {
                pending.extend(
                    children
                        .into_iter()
                        .rev()
                        .filter(|child| child.is_fetched() && !child.is_testcase())
                        .map(|child| current.child(child.uid().to_string())),
                );
            }
        }
        Ok(())
    }

    /// Re-read the single record at `path` and replace its scalar fields.
    ///
    /// Returns the node's new status.
    pub async fn refresh_record(&self, path: &NodePath) -> Result<Status, SyncError> {
        let resource = ResourcePath::for_path(path).map_err(|error| SyncError::from_api(path.to_string(), error))?;
        let fresh = self
            .backend
            .get_node(&resource)
            .await
            .map_err(|error| SyncError::from_api(path.to_string(), error))?;
        let status = fresh.status;
        self.store.update(|tree| tree.update_record(path, fresh))?;
        Ok(status)
    }

    pub fn fetch_state(&self, path: &NodePath) -> FetchState {
        let key = FetchKey::below(path);
        if self.in_flight.lock().expect("in-flight lock").contains_key(&key) {
            return FetchState::InFlight;
        }
        if let Some(error) = self.failures.lock().expect("fetch failures lock").get(path) {
            return FetchState::Failed(error.clone());
        }
        match self.snapshot().get(path) {
            Some(node) if node.is_fetched() => FetchState::Fetched,
            _ => FetchState::Unfetched,
        }
    }

    pub fn is_in_flight(&self, path: &NodePath) -> bool {
        self.in_flight
            .lock()
            .expect("in-flight lock")
            .contains_key(&FetchKey::below(path))
    }

    /// Join the fetch in flight for `key` if it started at or after
    /// `min_generation`, otherwise start a new one.
    fn join_or_start(&self, key: FetchKey, node: Option<NodePath>, min_generation: u64) -> SharedFetch {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock");
        if let Some(pending) = in_flight.get(&key) {
            if pending.generation >= min_generation {
                debug!(?key, "joining in-flight fetch");
                return pending.fetch.clone();
            }
            debug!(?key, "in-flight fetch predates the last change; starting another");
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let generation = self.generation.load(Ordering::Acquire);
        self.latest.lock().expect("latest fetches lock").insert(key.clone(), id);

        let this = self.clone();
        let ledger_key = key.clone();
        let fetch = async move {
            let result = match &node {
                Some(path) => this.fetch_below(path, &ledger_key, id).await,
                None => this.fetch_skeleton(&ledger_key, id).await,
            };
            this.settle(&ledger_key, id, node.as_ref(), &result);
            result
        }
        .boxed()
        .shared();
        in_flight.insert(
            key,
            PendingFetch {
                id,
                generation,
                fetch: fetch.clone(),
            },
        );
        fetch
    }

    fn is_superseded(&self, key: &FetchKey, id: u64) -> bool {
        self.latest
            .lock()
            .expect("latest fetches lock")
            .get(key)
            .is_some_and(|latest| *latest != id)
    }

    /// Apply `change` unless a newer fetch for `key` has started since.
    fn merge_if_latest<F>(&self, key: &FetchKey, id: u64, change: F) -> Result<(), SyncError>
    where
        F: FnOnce(&ReportTree) -> Result<ReportTree, TreeError>,
    {
        let merged = self.store.update_if(|tree| {
            if self.is_superseded(key, id) {
                return Ok(None);
            }
            change(tree).map(Some)
        })?;
        if merged.is_none() {
            debug!(?key, "discarding result of superseded fetch");
        }
        Ok(())
    }

    fn settle(&self, key: &FetchKey, id: u64, node: Option<&NodePath>, result: &Result<(), SyncError>) {
        {
            let mut in_flight = self.in_flight.lock().expect("in-flight lock");
            if in_flight.get(key).is_some_and(|pending| pending.id == id) {
                in_flight.remove(key);
            }
        }
        if self.is_superseded(key, id) {
            return;
        }
        let Some(path) = node else {
            if let Err(error) = result {
                warn!(%error, "plan skeleton fetch failed");
            }
            return;
        };
        let mut failures = self.failures.lock().expect("fetch failures lock");
        match result {
            Ok(()) => {
                failures.remove(path);
            }
            Err(error) => {
                warn!(node = %path, %error, "fetch failed; node left unfetched");
                failures.insert(path.clone(), error.clone());
            }
        }
    }

    async fn fetch_skeleton(&self, key: &FetchKey, id: u64) -> Result<(), SyncError> {
        let resource = ResourcePath::Report;
        let fresh = self
            .backend
            .get_node(&resource)
            .await
            .map_err(|error| SyncError::from_api(resource.to_string(), error))?;
        info!(plan = %fresh.uid, status = %fresh.status, "loaded plan skeleton");

        self.merge_if_latest(key, id, |tree| match tree.root_path() {
            Some(root) => tree.merge(root, fresh),
            None => ReportTree::from_root(fresh),
        })
    }

    async fn fetch_below(&self, path: &NodePath, key: &FetchKey, id: u64) -> Result<(), SyncError> {
        let level = FetchLevel::below(path);
        let resource = ResourcePath::for_path(path).map_err(|error| SyncError::from_api(path.to_string(), error))?;
        debug!(node = %path, %level, %resource, "fetching");

        if level == FetchLevel::Assertions {
            let fresh = self
                .backend
                .get_node(&resource)
                .await
                .map_err(|error| SyncError::from_api(path.to_string(), error))?;
            self.merge_if_latest(key, id, |tree| tree.update_record(path, fresh))?;
        } else {
            let children = self
                .backend
                .list_children(&resource)
                .await
                .map_err(|error| SyncError::from_api(path.to_string(), error))?;
            let item_count = children.len();
            self.merge_if_latest(key, id, |tree| tree.merge_children(path, children))?;
            debug!(node = %path, %level, item_count, "merged children");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, chain_backend, group, sample_backend};

    fn path(segments: &[&str]) -> NodePath {
        NodePath::from_segments(segments.iter().map(|segment| segment.to_string()).collect()).unwrap()
    }

    fn synchronizer(backend: MockBackend) -> (Arc<MockBackend>, TreeSynchronizer) {
        let backend = Arc::new(backend);
        let sync = TreeSynchronizer::new(backend.clone(), TreeStore::new());
        (backend, sync)
    }

    #[tokio::test]
    async fn load_fetches_plan_then_tests() {
        let (backend, sync) = synchronizer(sample_backend());
        let tree = sync.load().await.unwrap();

        assert_eq!(backend.requests(), vec!["GET /report", "GET /report/tests"]);
        assert_eq!(tree.len(), 3);
        assert!(matches!(sync.fetch_state(&path(&["P", "T1"])), FetchState::Unfetched));
        assert!(matches!(sync.fetch_state(&path(&["P"])), FetchState::Fetched));
    }

    #[tokio::test]
    async fn concurrent_expansions_share_one_fetch() {
        let (backend, sync) = synchronizer(sample_backend());
        sync.load().await.unwrap();
        let test = path(&["P", "T1"]);

        let (first, second) = tokio::join!(sync.expand(&test), sync.expand(&test));
        first.unwrap();
        second.unwrap();

        assert_eq!(backend.count("GET /report/tests/T1/suites"), 1);
        assert!(sync.snapshot().contains(&path(&["P", "T1", "S1"])));
        assert!(!sync.is_in_flight(&test));
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_fetch() {
        let (backend, sync) = synchronizer(sample_backend());
        sync.load().await.unwrap();
        let root = path(&["P"]);

        let (first, second, third) = tokio::join!(sync.refresh(&root), sync.refresh(&root), sync.refresh(&root));
        assert!(first.is_ok() && second.is_ok() && third.is_ok());
        assert_eq!(backend.count("GET /report/tests"), 2);
    }

    #[tokio::test]
    async fn expanding_a_fetched_node_issues_no_request() {
        let (backend, sync) = synchronizer(sample_backend());
        sync.load().await.unwrap();
        let before = backend.requests().len();
        sync.expand(&path(&["P"])).await.unwrap();
        assert_eq!(backend.requests().len(), before);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_node_retryable() {
        let (backend, sync) = synchronizer(sample_backend());
        sync.load().await.unwrap();
        let test = path(&["P", "T2"]);
        backend.fail("/report/tests/T2/suites", 500);

        let error = sync.expand(&test).await.unwrap_err();
        assert!(matches!(error, SyncError::FetchFailure { .. }));
        assert!(matches!(sync.fetch_state(&test), FetchState::Failed(_)));
        assert!(sync.snapshot().children(&test).is_none());

        backend.recover("/report/tests/T2/suites");
        sync.retry(&test).await.unwrap();
        assert!(matches!(sync.fetch_state(&test), FetchState::Fetched));
        assert!(sync.snapshot().contains(&path(&["P", "T2", "S2"])));
    }

    #[tokio::test]
    async fn expanding_a_suite_brings_testcases_with_assertions() {
        let (_backend, sync) = synchronizer(chain_backend());
        sync.load().await.unwrap();
        sync.expand(&path(&["P", "T"])).await.unwrap();
        sync.expand(&path(&["P", "T", "S"])).await.unwrap();

        let tree = sync.snapshot();
        let case = tree.get(&path(&["P", "T", "S", "C"])).unwrap();
        assert!(case.is_fetched());
    }

    #[tokio::test]
    async fn refresh_drops_vanished_children() {
        let (backend, sync) = synchronizer(sample_backend());
        sync.load().await.unwrap();
        sync.expand(&path(&["P", "T1"])).await.unwrap();
        backend.remove("/report/tests/T1");

        sync.refresh(&path(&["P"])).await.unwrap();
        let tree = sync.snapshot();
        assert!(!tree.contains(&path(&["P", "T1"])));
        assert!(!tree.contains(&path(&["P", "T1", "S1"])));
    }

    #[tokio::test]
    async fn refresh_record_updates_status_only() {
        let (backend, sync) = synchronizer(sample_backend());
        sync.load().await.unwrap();
        backend.set_status("/report", Status::Passed);

        let status = sync.refresh_record(&path(&["P"])).await.unwrap();
        assert_eq!(status, Status::Passed);
        assert_eq!(sync.snapshot().children(&path(&["P"])).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_nodes_are_reported() {
        let (_backend, sync) = synchronizer(sample_backend());
        sync.load().await.unwrap();
        let error = sync.expand(&path(&["P", "Missing"])).await.unwrap_err();
        assert!(matches!(error, SyncError::UnknownNode { .. }));
    }

    #[tokio::test]
    async fn inconsistent_listing_is_rejected_without_touching_the_tree() {
        let (backend, sync) = synchronizer(sample_backend());
        sync.load().await.unwrap();
        let test = path(&["P", "T1"]);
        backend.serve_listing("/report/tests/T1/suites", vec![group("S1", &["P", "Other"], &[])]);
        let before = sync.snapshot();

        let error = sync.expand(&test).await.unwrap_err();

        assert!(matches!(error, SyncError::MalformedResponse { .. }));
        assert!(!error.is_retryable());
        assert!(Arc::ptr_eq(&before, &sync.snapshot()));
        match sync.fetch_state(&test) {
            FetchState::Failed(recorded) => {
                assert!(matches!(recorded, SyncError::MalformedResponse { .. }));
                assert!(!recorded.is_retryable());
            }
            other => panic!("expected a failed fetch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_child_uids_are_malformed() {
        let (backend, sync) = synchronizer(sample_backend());
        sync.load().await.unwrap();
        backend.serve_listing(
            "/report/tests/T2/suites",
            vec![group("S2", &["P", "T2"], &[]), group("S2", &["P", "T2"], &[])],
        );
        let before = sync.snapshot();

        let error = sync.expand(&path(&["P", "T2"])).await.unwrap_err();

        assert!(matches!(error, SyncError::MalformedResponse { .. }));
        assert!(Arc::ptr_eq(&before, &sync.snapshot()));
    }

    #[tokio::test]
    async fn refresh_after_a_change_does_not_join_an_older_fetch() {
        let (backend, sync) = synchronizer(sample_backend());
        sync.load().await.unwrap();
        let test = path(&["P", "T1"]);

        let early = sync.expand(&test);
        tokio::pin!(early);
        assert!(futures_util::poll!(early.as_mut()).is_pending());
        backend.insert(group("S9", &["P", "T1"], &[]));
        sync.mark_stale();

        sync.refresh(&test).await.unwrap();
        early.await.unwrap();

        assert_eq!(backend.count("GET /report/tests/T1/suites"), 2);
        let tree = sync.snapshot();
        assert!(tree.contains(&path(&["P", "T1", "S1"])));
        assert!(tree.contains(&path(&["P", "T1", "S9"])));
        assert!(!sync.is_in_flight(&test));
    }

    #[tokio::test]
    async fn refresh_without_a_change_joins_the_pending_fetch() {
        let (backend, sync) = synchronizer(sample_backend());
        sync.load().await.unwrap();
        let test = path(&["P", "T1"]);

        let (expanded, refreshed) = tokio::join!(sync.expand(&test), sync.refresh(&test));
        expanded.unwrap();
        refreshed.unwrap();
        assert_eq!(backend.count("GET /report/tests/T1/suites"), 1);
    }
}
