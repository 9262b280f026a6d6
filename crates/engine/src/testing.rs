//! In-memory backend and record builders shared by the engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use indexmap::IndexMap;
use iview_api::{ApiError, ReportBackend, ResourcePath, RunRequest};
use iview_types::{Category, NodeKind, ReportNode, Status};
use serde_json::Value;

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn record(uid: &str, kind: NodeKind, category: Category, parents: &[&str]) -> ReportNode {
    ReportNode {
        uid: uid.to_string(),
        kind,
        category: Some(category),
        name: uid.to_string(),
        parent_uids: owned(parents),
        status: Status::Ready,
        status_override: None,
        entries: None,
        entry_uids: None,
        meta: IndexMap::new(),
    }
}

pub(crate) fn plan(uid: &str, children: &[&str]) -> ReportNode {
    ReportNode {
        entry_uids: Some(owned(children)),
        ..record(uid, NodeKind::Testplan, Category::Testplan, &[])
    }
}

pub(crate) fn group(uid: &str, parents: &[&str], children: &[&str]) -> ReportNode {
    let category = if parents.len() <= 1 { Category::Multitest } else { Category::Suite };
    ReportNode {
        entry_uids: Some(owned(children)),
        ..record(uid, NodeKind::TestGroup, category, parents)
    }
}

pub(crate) fn testcase(uid: &str, parents: &[&str], entries: Vec<Value>) -> ReportNode {
    ReportNode {
        entries: Some(entries),
        ..record(uid, NodeKind::TestCase, Category::Testcase, parents)
    }
}

/// Backend serving a fixed tree, recording every request as `"METHOD url"`.
///
/// Every call yields once before answering so that concurrent callers can
/// interleave.
#[derive(Debug, Default)]
pub(crate) struct MockBackend {
    nodes: Mutex<HashMap<String, ReportNode>>,
    children: Mutex<HashMap<String, Vec<String>>>,
    failures: Mutex<HashMap<String, u16>>,
    scripted: Mutex<HashMap<String, VecDeque<Status>>>,
    requests: Mutex<Vec<String>>,
    run_requests: Mutex<Vec<RunRequest>>,
    raw_listings: Mutex<HashMap<String, Vec<ReportNode>>>,
}

impl MockBackend {
    /// Serve `node` at its resource and list it under its parent. Inserting
    /// an already served node replaces its record in place.
    pub fn insert(&self, node: ReportNode) {
        let resource = ResourcePath::for_node(&node).expect("supported depth");
        if !node.parent_uids.is_empty() {
            let (parent_uid, grandparents) = node.parent_uids.split_last().expect("has parent");
            let parent = ResourcePath::from_ancestry(grandparents, parent_uid).expect("supported depth");
            let listing = parent.children_url_path().expect("parent has children");
            let mut children = self.children.lock().unwrap();
            let siblings = children.entry(listing).or_default();
            if !siblings.contains(&resource.url_path()) {
                siblings.push(resource.url_path());
            }
        }
        self.nodes.lock().unwrap().insert(resource.url_path(), node);
    }

    pub fn with(self, node: ReportNode) -> Self {
        self.insert(node);
        self
    }

    /// Drop a node from the served tree.
    pub fn remove(&self, url: &str) {
        self.nodes.lock().unwrap().remove(url);
        for listing in self.children.lock().unwrap().values_mut() {
            listing.retain(|entry| entry != url);
        }
    }

    /// Answer GETs of the listing at `url` with `nodes` verbatim, whatever
    /// their ancestry.
    pub fn serve_listing(&self, url: &str, nodes: Vec<ReportNode>) {
        self.raw_listings.lock().unwrap().insert(url.to_string(), nodes);
    }

    pub fn set_status(&self, url: &str, status: Status) {
        if let Some(node) = self.nodes.lock().unwrap().get_mut(url) {
            node.status = status;
        }
    }

    /// Statuses applied to the node at `url` on successive GETs.
    pub fn script_statuses(&self, url: &str, statuses: &[Status]) {
        self.scripted
            .lock()
            .unwrap()
            .insert(url.to_string(), statuses.iter().copied().collect());
    }

    pub fn fail(&self, url: &str, code: u16) {
        self.failures.lock().unwrap().insert(url.to_string(), code);
    }

    pub fn recover(&self, url: &str) {
        self.failures.lock().unwrap().remove(url);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Bodies of every run trigger received, in order.
    pub fn run_requests(&self) -> Vec<RunRequest> {
        self.run_requests.lock().unwrap().clone()
    }

    pub fn count(&self, request: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|seen| seen.as_str() == request)
            .count()
    }

    /// Record the request and compute the response as of arrival, then
    /// yield before delivering it.
    async fn respond<T>(&self, method: &str, url: &str, read: impl FnOnce() -> Result<T, ApiError>) -> Result<T, ApiError> {
        self.requests.lock().unwrap().push(format!("{method} {url}"));
        let injected = self.failures.lock().unwrap().get(url).copied();
        let response = match injected {
            Some(code) => Err(ApiError::Status {
                resource: url.to_string(),
                code,
                body: "injected failure".into(),
            }),
            None => read(),
        };
        tokio::task::yield_now().await;
        response
    }

    fn lookup(&self, url: &str) -> Result<ReportNode, ApiError> {
        self.nodes.lock().unwrap().get(url).cloned().ok_or_else(|| ApiError::Status {
            resource: url.to_string(),
            code: 404,
            body: "not found".into(),
        })
    }
}

#[async_trait]
impl ReportBackend for MockBackend {
    async fn get_node(&self, resource: &ResourcePath) -> Result<ReportNode, ApiError> {
        let url = resource.url_path();
        self.respond("GET", &url, || {
            let next = self
                .scripted
                .lock()
                .unwrap()
                .get_mut(&url)
                .and_then(|statuses| statuses.pop_front());
            if let Some(status) = next {
                self.set_status(&url, status);
            }
            self.lookup(&url)
        })
        .await
    }

    async fn list_children(&self, parent: &ResourcePath) -> Result<Vec<ReportNode>, ApiError> {
        let url = parent.children_url_path().unwrap_or_default();
        self.respond("GET", &url, || {
            if let Some(raw) = self.raw_listings.lock().unwrap().get(&url) {
                return Ok(raw.clone());
            }
            let listing = self.children.lock().unwrap().get(&url).cloned().unwrap_or_default();
            listing.iter().map(|child| self.lookup(child)).collect()
        })
        .await
    }

    async fn trigger_run(&self, resource: &ResourcePath, request: &RunRequest) -> Result<ReportNode, ApiError> {
        let url = resource.url_path();
        self.run_requests.lock().unwrap().push(request.clone());
        self.respond("PUT", &url, || {
            self.set_status(&url, request.status);
            self.lookup(&url)
        })
        .await
    }
}

/// Plan `P` with two multitests:
///
/// ```text
/// P
/// ├── T1
/// │   └── S1
/// │       ├── C1
/// │       └── C2
/// └── T2
///     └── S2
///         └── C3
/// ```
pub(crate) fn sample_backend() -> MockBackend {
    MockBackend::default()
        .with(plan("P", &["T1", "T2"]))
        .with(group("T1", &["P"], &["S1"]))
        .with(group("S1", &["P", "T1"], &["C1", "C2"]))
        .with(testcase("C1", &["P", "T1", "S1"], Vec::new()))
        .with(testcase("C2", &["P", "T1", "S1"], Vec::new()))
        .with(group("T2", &["P"], &["S2"]))
        .with(group("S2", &["P", "T2"], &["C3"]))
        .with(testcase("C3", &["P", "T2", "S2"], Vec::new()))
}

/// Plan `P` with a single chain `P/T/S/C`.
pub(crate) fn chain_backend() -> MockBackend {
    MockBackend::default()
        .with(plan("P", &["T"]))
        .with(group("T", &["P"], &["S"]))
        .with(group("S", &["P", "T"], &["C"]))
        .with(testcase("C", &["P", "T", "S"], Vec::new()))
}
