//! Run triggering with optimistic status updates.
//!
//! A trigger is a two-phase operation: the node is marked `running` in the
//! tree before the request is sent, then either confirmed with the record
//! returned by the backend or reverted to its prior status. Triggers are
//! tracked per node in a pending ledger; a second trigger for a node whose
//! first one has not settled is refused.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use iview_api::{ReportBackend, ResourcePath, RunRequest};
use iview_types::{NodePath, ReportNode, Status};
use tracing::{info, warn};

use crate::error::RunError;
use crate::tree::TreeStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRun {
    prior_status: Status,
}

/// Last known outcome of a trigger for one node.
#[derive(Debug, Clone)]
pub enum RunState {
    Pending { prior_status: Status },
    Confirmed { status: Status },
    Failed(RunError),
}

#[derive(Clone)]
pub struct RunController {
    backend: Arc<dyn ReportBackend>,
    store: TreeStore,
    pending: Arc<Mutex<HashMap<NodePath, PendingRun>>>,
    outcomes: Arc<Mutex<HashMap<NodePath, RunState>>>,
}

impl fmt::Debug for RunController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunController")
            .field("pending", &self.pending.lock().expect("pending runs lock").len())
            .finish()
    }
}

impl RunController {
    pub fn new(backend: Arc<dyn ReportBackend>, store: TreeStore) -> Self {
        Self {
            backend,
            store,
            pending: Arc::new(Mutex::new(HashMap::new())),
            outcomes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Ask the backend to run the subtree at `path`.
    ///
    /// Returns the record the backend answered with. On failure the node's
    /// status is restored and the error is also kept as the node's run state.
    pub async fn trigger(&self, path: &NodePath) -> Result<ReportNode, RunError> {
        let prior_status = self
            .store
            .snapshot()
            .get(path)
            .map(|node| node.record().status)
            .ok_or_else(|| RunError::UnknownNode { path: path.to_string() })?;
        let resource = ResourcePath::for_path(path).map_err(|source| RunError::RunTriggerFailure {
            path: path.to_string(),
            source,
        })?;

        {
            let mut pending = self.pending.lock().expect("pending runs lock");
            if pending.contains_key(path) {
                return Err(RunError::AlreadyPending { path: path.to_string() });
            }
            pending.insert(path.clone(), PendingRun { prior_status });
        }
        self.record_outcome(path, RunState::Pending { prior_status });

        if let Err(error) = self.store.update(|tree| tree.with_status(path, Status::Running)) {
            self.pending.lock().expect("pending runs lock").remove(path);
            warn!(node = %path, %error, "node vanished before the run was sent");
            let failure = RunError::UnknownNode { path: path.to_string() };
            self.record_outcome(path, RunState::Failed(failure.clone()));
            return Err(failure);
        }
        info!(node = %path, %resource, prior = %prior_status, "triggering run");

        let request = RunRequest::running(path.uid());
        match self.backend.trigger_run(&resource, &request).await {
            Ok(record) => Ok(self.confirm(path, record)),
            Err(source) => Err(self.revert(path, RunError::RunTriggerFailure {
                path: path.to_string(),
                source,
            })),
        }
    }

    pub fn is_pending(&self, path: &NodePath) -> bool {
        self.pending.lock().expect("pending runs lock").contains_key(path)
    }

    pub fn state(&self, path: &NodePath) -> Option<RunState> {
        self.outcomes.lock().expect("run outcomes lock").get(path).cloned()
    }

    fn confirm(&self, path: &NodePath, record: ReportNode) -> ReportNode {
        self.pending.lock().expect("pending runs lock").remove(path);
        if let Err(error) = self.store.update(|tree| tree.update_record(path, record.shallow())) {
            warn!(node = %path, %error, "run confirmed for a node no longer in the tree");
        }
        info!(node = %path, status = %record.status, "run accepted");
        self.record_outcome(path, RunState::Confirmed { status: record.status });
        record
    }

    fn revert(&self, path: &NodePath, error: RunError) -> RunError {
        let prior = self.pending.lock().expect("pending runs lock").remove(path);
        if let Some(PendingRun { prior_status }) = prior
            && let Err(tree_error) = self.store.update(|tree| tree.with_status(path, prior_status))
        {
            warn!(node = %path, error = %tree_error, "could not restore status after failed run");
        }
        warn!(node = %path, %error, "run trigger failed; status reverted");
        self.record_outcome(path, RunState::Failed(error.clone()));
        error
    }

    fn record_outcome(&self, path: &NodePath, state: RunState) {
        self.outcomes
            .lock()
            .expect("run outcomes lock")
            .insert(path.clone(), state);
    }
}
