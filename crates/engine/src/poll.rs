//! Status polling for running nodes.
//!
//! After a run is accepted the backend only reports progress when asked.
//! [`StatusPoller`] keeps at most one polling task per node. Each task
//! re-reads the node (and the plan root) on a fixed interval, one request at
//! a time, until the node reaches a terminal status, disappears from the
//! tree, the optional deadline passes, or the task is cancelled.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use iview_api::ApiError;
use iview_types::{NodePath, Status};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::sync::TreeSynchronizer;

/// Why a polling task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Terminal(Status),
    Removed,
    TimedOut,
    Cancelled,
}

/// Handle on a running (or finished) polling task.
#[derive(Debug, Clone)]
pub struct PollHandle {
    path: NodePath,
    outcome: watch::Receiver<Option<PollOutcome>>,
}

impl PollHandle {
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// Outcome if the task has already stopped.
    pub fn outcome(&self) -> Option<PollOutcome> {
        *self.outcome.borrow()
    }

    /// Wait for the task to stop.
    pub async fn finished(mut self) -> PollOutcome {
        match self.outcome.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).unwrap_or(PollOutcome::Cancelled),
            Err(_) => PollOutcome::Cancelled,
        }
    }
}

struct ActivePoll {
    id: u64,
    token: CancellationToken,
    outcome: watch::Receiver<Option<PollOutcome>>,
}

#[derive(Clone)]
pub struct StatusPoller {
    sync: TreeSynchronizer,
    interval: Duration,
    timeout: Option<Duration>,
    active: Arc<Mutex<HashMap<NodePath, ActivePoll>>>,
    next_id: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl fmt::Debug for StatusPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusPoller")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("active", &self.active_count())
            .finish()
    }
}

impl StatusPoller {
    pub fn new(sync: TreeSynchronizer, interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            sync,
            interval,
            timeout,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start polling `path`, or join the task already polling it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn watch(&self, path: NodePath) -> PollHandle {
        let mut active = self.active.lock().expect("active polls lock");
        if let Some(existing) = active.get(&path) {
            debug!(node = %path, "already polling");
            return PollHandle {
                path,
                outcome: existing.outcome.clone(),
            };
        }

        let (sender, receiver) = watch::channel(None);
        let token = self.shutdown.child_token();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        active.insert(
            path.clone(),
            ActivePoll {
                id,
                token: token.clone(),
                outcome: receiver.clone(),
            },
        );

        let poller = self.clone();
        let task_path = path.clone();
        tokio::spawn(async move {
            let outcome = poller.poll_until_settled(&task_path, &token).await;
            poller.release(&task_path, id);
            info!(node = %task_path, ?outcome, "stopped polling");
            sender.send_replace(Some(outcome));
        });

        PollHandle { path, outcome: receiver }
    }

    /// Stop polling `path`. Returns whether a task was running.
    pub fn cancel(&self, path: &NodePath) -> bool {
        match self.active.lock().expect("active polls lock").get(path) {
            Some(poll) => {
                poll.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop every polling task.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_polling(&self, path: &NodePath) -> bool {
        self.active.lock().expect("active polls lock").contains_key(path)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().expect("active polls lock").len()
    }

    fn release(&self, path: &NodePath, id: u64) {
        let mut active = self.active.lock().expect("active polls lock");
        if active.get(path).is_some_and(|poll| poll.id == id) {
            active.remove(path);
        }
    }

    async fn poll_until_settled(&self, path: &NodePath, token: &CancellationToken) -> PollOutcome {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => return PollOutcome::Cancelled,
                _ = ticker.tick() => {}
            }

            if let Some(limit) = self.timeout
                && started.elapsed() >= limit
            {
                warn!(node = %path, ?limit, "gave up waiting for a terminal status");
                return PollOutcome::TimedOut;
            }
            if !self.sync.snapshot().contains(path) {
                return PollOutcome::Removed;
            }

            match self.sync.refresh_record(path).await {
                Ok(status) if status.is_terminal() => {
                    self.sync.mark_stale();
                    self.refresh_after_completion(path).await;
                    return PollOutcome::Terminal(status);
                }
                Ok(status) => debug!(node = %path, %status, "still running"),
                Err(SyncError::UnknownNode { .. }) => return PollOutcome::Removed,
                Err(SyncError::FetchFailure {
                    source: ApiError::Status { code: 404, .. },
                    ..
                }) => return PollOutcome::Removed,
                Err(error) => warn!(node = %path, %error, "status poll failed; retrying on next tick"),
            }
            self.refresh_root(path).await;
        }
    }

    async fn refresh_root(&self, path: &NodePath) {
        if path.is_root() {
            return;
        }
        let Some(root) = self.sync.snapshot().root_path().cloned() else {
            return;
        };
        if let Err(error) = self.sync.refresh_record(&root).await {
            debug!(%error, "plan status refresh failed");
        }
    }

    async fn refresh_after_completion(&self, path: &NodePath) {
        let is_testcase = self
            .sync
            .snapshot()
            .get(path)
            .is_some_and(|node| node.is_testcase());
        if !is_testcase && let Err(error) = self.sync.refresh_subtree(path).await {
            warn!(node = %path, %error, "could not refresh finished subtree");
        }
        self.refresh_root(path).await;
    }
}
