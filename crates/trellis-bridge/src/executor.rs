//! Off-thread execution and ordered delivery.
//!
//! The [`AsyncInvocationExecutor`] wraps a tokio runtime handle. Feature
//! work runs on the blocking pool. Deliveries to the script side go through
//! lanes: one unbounded queue and drain task per callback registration, so
//! everything sent to one subscription arrives in the order it was sent.
//!
//! Every lane waits on the owning application's [`ReadySignal`] before each
//! delivery, which holds output back while the script context is still
//! starting up.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{BridgeError, BridgeResult};

/// Work queued on a lane or the blocking pool.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Whether a script context can accept deliveries.
///
/// Clones share state.
#[derive(Clone)]
pub struct ReadySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadySignal {
    /// A signal starting in the given state.
    #[must_use]
    pub fn new(ready: bool) -> Self {
        let (tx, _rx) = watch::channel(ready);
        Self { tx: Arc::new(tx) }
    }

    /// Flip the signal. Waiters wake when it turns ready.
    pub fn set(&self, ready: bool) {
        let previous = self.tx.send_replace(ready);
        if previous != ready {
            debug!(ready, "Script readiness changed");
        }
    }

    /// Current state.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal is ready.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once ready.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadySignal")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Identifies one ordered delivery lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaneId(u64);

static NEXT_LANE: AtomicU64 = AtomicU64::new(1);

impl LaneId {
    pub(crate) fn next() -> Self {
        Self(NEXT_LANE.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lane-{}", self.0)
    }
}

struct Lane {
    tx: mpsc::UnboundedSender<Job>,
    depth: Arc<AtomicUsize>,
}

/// A cancellable task waiting for a script context to become ready.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug, Clone)]
pub struct DelayedTask {
    token: CancellationToken,
}

impl DelayedTask {
    /// Drop the task if it has not started yet.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the task is still waiting to run.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.token.is_cancelled()
    }
}

/// Runs feature work off the calling thread and feeds delivery lanes.
pub struct AsyncInvocationExecutor {
    handle: Handle,
    lanes: DashMap<LaneId, Lane>,
    shutdown: CancellationToken,
    capacity_hint: usize,
}

impl AsyncInvocationExecutor {
    /// Default backlog above which a lane logs a warning.
    pub const DEFAULT_CAPACITY_HINT: usize = 64;

    /// An executor on the given runtime.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            lanes: DashMap::new(),
            shutdown: CancellationToken::new(),
            capacity_hint: Self::DEFAULT_CAPACITY_HINT,
        }
    }

    /// An executor on the runtime the caller is running in.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Runtime`] outside a tokio runtime.
    pub fn current() -> BridgeResult<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| BridgeError::Runtime(e.to_string()))
    }

    /// Set the lane backlog warning threshold.
    #[must_use]
    pub fn with_capacity_hint(mut self, hint: usize) -> Self {
        self.capacity_hint = hint.max(1);
        self
    }

    /// The runtime handle.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run `work` on the blocking pool.
    ///
    /// Returns `false` without running anything once the executor is shut
    /// down.
    pub fn submit<F>(&self, work: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            debug!("Executor shut down, dropping submitted work");
            return false;
        }
        drop(self.handle.spawn_blocking(work));
        true
    }

    /// Spawn an async task that is abandoned at shutdown.
    pub(crate) fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let token = self.shutdown.child_token();
        drop(self.handle.spawn(async move {
            tokio::select! {
                () = token.cancelled() => trace!("Task abandoned at shutdown"),
                () = task => {},
            }
        }));
        true
    }

    /// Block the current thread on `future`.
    ///
    /// # Panics
    ///
    /// Panics when called from inside an async task. Blocking-pool threads
    /// and threads outside the runtime are fine.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    /// Append `job` to a lane, creating the lane on first use.
    pub(crate) fn enqueue(&self, lane: LaneId, ready: &ReadySignal, job: Job) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let entry = self
            .lanes
            .entry(lane)
            .or_insert_with(|| self.open_lane(lane, ready.clone()));

        let depth = entry.depth.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if depth > self.capacity_hint {
            warn!(%lane, depth, hint = self.capacity_hint, "Delivery lane backlog above capacity hint");
        }
        if entry.tx.send(job).is_err() {
            entry.depth.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Stop accepting deliveries on `lane`. Already queued jobs still drain.
    pub(crate) fn close_lane(&self, lane: LaneId) {
        if self.lanes.remove(&lane).is_some() {
            trace!(%lane, "Lane closed");
        }
    }

    /// Run `job` once `ready` holds, outside any lane.
    pub(crate) fn deliver_unordered(&self, ready: &ReadySignal, job: Job) -> bool {
        let ready = ready.clone();
        self.spawn(async move {
            ready.wait().await;
            if let Err(e) = tokio::task::spawn_blocking(job).await {
                warn!(error = %e, "Unordered delivery failed");
            }
        })
    }

    /// Run `task` once `ready` holds.
    ///
    /// Without an interval the task waits on the signal directly. With one,
    /// it sleeps for the interval and re-checks, re-arming itself until the
    /// signal is ready. Either way it is dropped if cancelled or if the
    /// executor shuts down first.
    pub fn defer<F>(&self, ready: &ReadySignal, interval: Option<Duration>, task: F) -> DelayedTask
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.shutdown.child_token();
        let delayed = DelayedTask {
            token: token.clone(),
        };
        let ready = ready.clone();

        drop(self.handle.spawn(async move {
            let proceed = match interval {
                None => {
                    tokio::select! {
                        () = token.cancelled() => false,
                        () = ready.wait() => true,
                    }
                },
                Some(every) => loop {
                    tokio::select! {
                        () = token.cancelled() => break false,
                        () = tokio::time::sleep(every) => {},
                    }
                    if ready.is_ready() {
                        break true;
                    }
                    trace!("Deferred task not ready, re-armed");
                },
            };

            if !proceed || token.is_cancelled() {
                trace!("Deferred task dropped");
                return;
            }
            // Mark as started so callers see it is no longer pending.
            token.cancel();
            if let Err(e) = tokio::task::spawn_blocking(task).await {
                warn!(error = %e, "Deferred task failed");
            }
        }));

        delayed
    }

    /// Cancel every lane and deferred task and refuse further work.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let lanes = self.lanes.len();
        self.lanes.clear();
        debug!(lanes, "Executor shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of open lanes.
    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    fn open_lane(&self, lane: LaneId, ready: ReadySignal) -> Lane {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let depth = Arc::new(AtomicUsize::new(0));
        let lane_depth = Arc::clone(&depth);
        let token = self.shutdown.child_token();
        trace!(%lane, "Lane opened");

        drop(self.handle.spawn(async move {
            loop {
                let job = tokio::select! {
                    () = token.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(job) => job,
                        None => break,
                    },
                };
                tokio::select! {
                    () = token.cancelled() => break,
                    () = ready.wait() => {},
                }
                if let Err(e) = tokio::task::spawn_blocking(job).await {
                    warn!(%lane, error = %e, "Delivery panicked");
                }
                lane_depth.fetch_sub(1, Ordering::AcqRel);
            }
            trace!(%lane, "Lane drained");
        }));

        Lane { tx, depth }
    }
}

impl fmt::Debug for AsyncInvocationExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncInvocationExecutor")
            .field("lanes", &self.lanes.len())
            .field("shut_down", &self.is_shut_down())
            .field("capacity_hint", &self.capacity_hint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
